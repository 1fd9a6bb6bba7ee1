use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

static NEXT_PARAM_ID: AtomicUsize = AtomicUsize::new(0);

/// Process-unique identity of a parameter tensor. Clones of a `Parameter`
/// share it, which is what makes set union across modules well defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

#[derive(Debug)]
struct ParamData {
    value: Vec<f64>,
    grad: Vec<f64>,
}

/// A shared handle to one trainable tensor (flattened) and its gradient.
///
/// Modules keep a handle for their own forward/backward passes and hand out
/// clones through `TrainableModule::parameters`; the optimizer updates the
/// same storage through its clone.
#[derive(Debug, Clone)]
pub struct Parameter {
    id: ParamId,
    name: Rc<str>,
    data: Rc<RefCell<ParamData>>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Vec<f64>) -> Parameter {
        let grad = vec![0.0; value.len()];
        Parameter {
            id: ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed)),
            name: Rc::from(name.into()),
            data: Rc::new(RefCell::new(ParamData { value, grad })),
        }
    }

    pub fn id(&self) -> ParamId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.data.borrow().value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self) -> Ref<'_, [f64]> {
        Ref::map(self.data.borrow(), |d| d.value.as_slice())
    }

    pub fn grad(&self) -> Ref<'_, [f64]> {
        Ref::map(self.data.borrow(), |d| d.grad.as_slice())
    }

    pub fn get(&self, index: usize) -> f64 {
        self.data.borrow().value[index]
    }

    /// Overwrites the values, keeping the length fixed.
    pub fn set_value(&self, value: &[f64]) -> Result<()> {
        let mut data = self.data.borrow_mut();
        if data.value.len() != value.len() {
            return Err(Error::shape("parameter value", data.value.len(), value.len()));
        }
        data.value.copy_from_slice(value);
        Ok(())
    }

    /// Adds `grad` into the accumulated gradient.
    pub fn accumulate_grad(&self, grad: &[f64]) -> Result<()> {
        let mut data = self.data.borrow_mut();
        if data.grad.len() != grad.len() {
            return Err(Error::shape("parameter gradient", data.grad.len(), grad.len()));
        }
        for (acc, g) in data.grad.iter_mut().zip(grad) {
            *acc += g;
        }
        Ok(())
    }

    pub fn zero_grad(&self) {
        self.data.borrow_mut().grad.iter_mut().for_each(|g| *g = 0.0);
    }

    /// Runs `update(value, grad)` with the value mutable, for optimizers.
    pub fn update<F>(&self, update: F)
    where
        F: FnOnce(&mut [f64], &[f64]),
    {
        let mut data = self.data.borrow_mut();
        let ParamData { value, grad } = &mut *data;
        update(value.as_mut_slice(), grad.as_slice());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity_and_storage() {
        let a = Parameter::new("w", vec![1.0, 2.0]);
        let b = a.clone();
        b.set_value(&[3.0, 4.0]).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(&*a.value(), &[3.0, 4.0]);
        assert_ne!(a.id(), Parameter::new("w", vec![0.0]).id());
    }

    #[test]
    fn gradients_accumulate_until_zeroed() {
        let p = Parameter::new("b", vec![0.0]);
        p.accumulate_grad(&[1.5]).unwrap();
        p.accumulate_grad(&[0.5]).unwrap();
        assert_eq!(&*p.grad(), &[2.0]);
        p.zero_grad();
        assert_eq!(&*p.grad(), &[0.0]);
        assert!(p.accumulate_grad(&[1.0, 2.0]).is_err());
    }
}
