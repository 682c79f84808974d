//! Adam optimizer with checkpointable state, and a staircase learning-rate
//! schedule.

use std::collections::HashMap;

use candle_core::backprop::GradStore;
use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;

/// Adam hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamParams {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

impl Default for AdamParams {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

struct Slot {
    name: String,
    var: Var,
    first_moment: Var,
    second_moment: Var,
}

/// Adam over the named variables of a [`VarMap`].
///
/// Moments are keyed by variable name so the full optimizer state can be
/// written next to the parameters and restored exactly.
pub struct Adam {
    slots: Vec<Slot>,
    params: AdamParams,
    step: u64,
}

impl Adam {
    /// Track every variable currently registered in `vars`.
    pub fn new(vars: &VarMap, params: AdamParams) -> candle_core::Result<Self> {
        let data = vars
            .data()
            .lock()
            .map_err(|e| candle_core::Error::Msg(format!("parameter store poisoned: {}", e)))?;
        let mut named: Vec<(&String, &Var)> = data.iter().collect();
        named.sort_by(|a, b| a.0.cmp(b.0));

        let slots = named
            .into_iter()
            .map(|(name, var)| {
                Ok(Slot {
                    name: name.clone(),
                    var: var.clone(),
                    first_moment: Var::zeros(var.shape().clone(), var.dtype(), var.device())?,
                    second_moment: Var::zeros(var.shape().clone(), var.dtype(), var.device())?,
                })
            })
            .collect::<candle_core::Result<Vec<_>>>()?;

        Ok(Self {
            slots,
            params,
            step: 0,
        })
    }

    pub fn learning_rate(&self) -> f64 {
        self.params.learning_rate
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.params.learning_rate = learning_rate;
    }

    /// Number of updates applied so far.
    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Apply one bias-corrected Adam update from `grads`.
    ///
    /// Variables without a gradient (not reached by the loss) are left alone.
    pub fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        self.step += 1;
        let t = self.step as i32;
        let AdamParams {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } = self.params;
        let lr_t = learning_rate * (1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t));

        for slot in &self.slots {
            let Some(grad) = grads.get(slot.var.as_tensor()) else {
                continue;
            };
            let m = ((slot.first_moment.as_tensor() * beta1)? + (grad * (1.0 - beta1))?)?;
            let v = ((slot.second_moment.as_tensor() * beta2)? + (grad.sqr()? * (1.0 - beta2))?)?;
            let update = ((&m / (v.sqrt()? + epsilon)?)? * lr_t)?;
            let next = (slot.var.as_tensor() - update)?;
            slot.first_moment.set(&m)?;
            slot.second_moment.set(&v)?;
            slot.var.set(&next)?;
        }
        Ok(())
    }

    /// Back-propagate `loss` and apply one update.
    pub fn backward_step(&mut self, loss: &Tensor) -> candle_core::Result<()> {
        let grads = loss.backward()?;
        self.step(&grads)
    }

    /// Detached copies of the moments (`m/<name>`, `v/<name>`) and the step
    /// counter (`step`).
    pub fn state_tensors(&self) -> candle_core::Result<HashMap<String, Tensor>> {
        let mut state = HashMap::with_capacity(self.slots.len() * 2 + 1);
        for slot in &self.slots {
            state.insert(
                format!("m/{}", slot.name),
                slot.first_moment.as_tensor().copy()?,
            );
            state.insert(
                format!("v/{}", slot.name),
                slot.second_moment.as_tensor().copy()?,
            );
        }
        state.insert(
            "step".to_string(),
            Tensor::new(&[self.step as i64], &Device::Cpu)?,
        );
        Ok(state)
    }

    /// Check that `state` holds a moment of the right shape for every
    /// parameter and a step counter, without touching the optimizer.
    pub fn check_state(&self, state: &HashMap<String, Tensor>) -> candle_core::Result<()> {
        for slot in &self.slots {
            for key in [format!("m/{}", slot.name), format!("v/{}", slot.name)] {
                let value = state.get(&key).ok_or_else(|| missing_state(&key))?;
                if value.shape() != slot.var.shape() {
                    return Err(candle_core::Error::Msg(format!(
                        "optimizer state '{}' is {:?}, parameter is {:?}",
                        key,
                        value.shape(),
                        slot.var.shape()
                    )));
                }
            }
        }
        let step = state.get("step").ok_or_else(|| missing_state("step"))?;
        if step.elem_count() != 1 {
            return Err(missing_state("step"));
        }
        Ok(())
    }

    /// Restore state written by [`Adam::state_tensors`]. Nothing is changed
    /// unless the whole state passes [`Adam::check_state`].
    pub fn load_state(&mut self, state: &HashMap<String, Tensor>) -> candle_core::Result<()> {
        self.check_state(state)?;
        let step = state.get("step").ok_or_else(|| missing_state("step"))?;
        let step = step
            .flatten_all()?
            .to_vec1::<i64>()?
            .first()
            .copied()
            .ok_or_else(|| missing_state("step"))?;
        for slot in &self.slots {
            let m = state
                .get(&format!("m/{}", slot.name))
                .ok_or_else(|| missing_state(&slot.name))?;
            let v = state
                .get(&format!("v/{}", slot.name))
                .ok_or_else(|| missing_state(&slot.name))?;
            slot.first_moment
                .set(&m.to_device(slot.var.device())?.to_dtype(slot.var.dtype())?)?;
            slot.second_moment
                .set(&v.to_device(slot.var.device())?.to_dtype(slot.var.dtype())?)?;
        }
        self.step = step as u64;
        Ok(())
    }
}

fn missing_state(key: &str) -> candle_core::Error {
    candle_core::Error::Msg(format!("optimizer state missing '{}'", key))
}

/// Staircase exponential decay: `start * decay_rate^floor(step / decay_steps)`.
///
/// The global step is passed in explicitly so a restored run replays the
/// same schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialDecay {
    pub start: f64,
    pub decay_rate: f64,
    pub decay_steps: u64,
}

impl ExponentialDecay {
    pub fn learning_rate(&self, global_step: u64) -> f64 {
        let exponent = global_step / self.decay_steps.max(1);
        self.start * self.decay_rate.powi(exponent as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::{Init, VarBuilder};

    fn quadratic_setup() -> (VarMap, Tensor) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let w = vb.get_with_hints(3, "w", Init::Const(5.0)).unwrap();
        (varmap, w)
    }

    #[test]
    fn test_adam_minimises_quadratic() {
        let (varmap, w) = quadratic_setup();
        let mut adam = Adam::new(
            &varmap,
            AdamParams {
                learning_rate: 0.1,
                ..Default::default()
            },
        )
        .unwrap();

        let initial = w.sqr().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        for _ in 0..100 {
            let loss = w.sqr().unwrap().sum_all().unwrap();
            adam.backward_step(&loss).unwrap();
        }
        let fin = w.sqr().unwrap().sum_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(fin < initial * 0.1, "loss {initial} -> {fin}");
        assert_eq!(adam.step_count(), 100);
    }

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        // With bias correction the first Adam step has magnitude ~lr.
        let (varmap, w) = quadratic_setup();
        let mut adam = Adam::new(
            &varmap,
            AdamParams {
                learning_rate: 0.01,
                ..Default::default()
            },
        )
        .unwrap();
        let loss = w.sqr().unwrap().sum_all().unwrap();
        adam.backward_step(&loss).unwrap();
        for v in w.to_vec1::<f32>().unwrap() {
            assert!((v - 4.99).abs() < 1e-4, "got {v}");
        }
    }

    #[test]
    fn test_state_round_trip_resumes_identically() {
        let (varmap_a, w_a) = quadratic_setup();
        let mut adam_a = Adam::new(&varmap_a, AdamParams::default()).unwrap();
        for _ in 0..3 {
            adam_a
                .backward_step(&w_a.sqr().unwrap().sum_all().unwrap())
                .unwrap();
        }
        let state = adam_a.state_tensors().unwrap();

        let (varmap_b, w_b) = quadratic_setup();
        {
            let data = varmap_b.data().lock().unwrap();
            data["w"].set(&w_a.copy().unwrap()).unwrap();
        }
        let mut adam_b = Adam::new(&varmap_b, AdamParams::default()).unwrap();
        adam_b.load_state(&state).unwrap();
        assert_eq!(adam_b.step_count(), 3);

        adam_a
            .backward_step(&w_a.sqr().unwrap().sum_all().unwrap())
            .unwrap();
        adam_b
            .backward_step(&w_b.sqr().unwrap().sum_all().unwrap())
            .unwrap();
        assert_eq!(w_a.to_vec1::<f32>().unwrap(), w_b.to_vec1::<f32>().unwrap());
    }

    #[test]
    fn test_load_state_reports_missing_moment() {
        let (varmap, _w) = quadratic_setup();
        let mut adam = Adam::new(&varmap, AdamParams::default()).unwrap();
        assert!(adam.load_state(&HashMap::new()).is_err());
    }

    #[test]
    fn test_load_state_is_all_or_nothing() {
        let (varmap, w) = quadratic_setup();
        let mut adam = Adam::new(&varmap, AdamParams::default()).unwrap();
        adam.backward_step(&w.sqr().unwrap().sum_all().unwrap())
            .unwrap();
        let before = adam.state_tensors().unwrap();

        let mut state = before.clone();
        state.insert("m/w".to_string(), state["m/w"].zeros_like().unwrap());
        state.remove("step");
        assert!(adam.load_state(&state).is_err());

        let after = adam.state_tensors().unwrap();
        assert_eq!(adam.step_count(), 1);
        assert_eq!(
            after["m/w"].to_vec1::<f32>().unwrap(),
            before["m/w"].to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn test_exponential_decay_staircase() {
        let schedule = ExponentialDecay {
            start: 0.001,
            decay_rate: 0.8,
            decay_steps: 1000,
        };
        assert_eq!(schedule.learning_rate(0), 0.001);
        assert_eq!(schedule.learning_rate(999), 0.001);
        assert!((schedule.learning_rate(1000) - 0.0008).abs() < 1e-12);
        assert!((schedule.learning_rate(2500) - 0.001 * 0.64).abs() < 1e-12);
    }
}
