use crate::error::BoxError;
use std::fmt;

/// Checks that a value is valid.
pub trait Validator<T: ?Sized> {
    /// Returns an error describing why `data` is invalid.
    fn validate(&self, data: &T) -> Result<(), BoxError>;
}

/// Returns a [`Validator`] that calls `f`.
pub fn validator_fn<T, F>(f: F) -> ValidatorFn<F>
where
    T: ?Sized,
    F: Fn(&T) -> Result<(), BoxError>,
{
    ValidatorFn { f }
}

/// A [`Validator`] backed by a closure, see [`validator_fn`].
#[derive(Clone, Copy)]
pub struct ValidatorFn<F> {
    f: F,
}

impl<T, F> Validator<T> for ValidatorFn<F>
where
    T: ?Sized,
    F: Fn(&T) -> Result<(), BoxError>,
{
    fn validate(&self, data: &T) -> Result<(), BoxError> {
        (self.f)(data)
    }
}

impl<F> fmt::Debug for ValidatorFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatorFn")
            .field("f", &std::any::type_name::<F>())
            .finish()
    }
}

/// A [`Validator`] that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NothingValidator;

impl<T: ?Sized> Validator<T> for NothingValidator {
    fn validate(&self, _: &T) -> Result<(), BoxError> {
        Ok(())
    }
}
