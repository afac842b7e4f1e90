use crate::error::HandlerError;

/// Results that may carry handler errors inline.
pub trait HasErrors {
    /// The errors carried by the result.
    fn errors(&self) -> &[HandlerError];

    /// Remove and return the errors carried by the result.
    fn take_errors(&mut self) -> Vec<HandlerError>;
}

/// The error raised by a handler whose caller asked for failures to be
/// thrown.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TevmFailure {
    /// Exactly one error was reported.
    #[error(transparent)]
    Single(HandlerError),
    /// Several errors were reported.
    #[error("{} errors occurred: {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<HandlerError>),
}

impl TevmFailure {
    /// All errors in the failure.
    pub fn errors(&self) -> &[HandlerError] {
        match self {
            Self::Single(err) => core::slice::from_ref(err),
            Self::Aggregate(errs) => errs,
        }
    }
}

fn join_messages(errors: &[HandlerError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Apply the throw-on-fail policy to a handler result.
///
/// With `throw_on_fail` unset the result is returned as is, errors inline.
/// Otherwise a result with errors becomes a [`TevmFailure`]: a single error
/// is raised directly and several are raised as an aggregate.
pub fn maybe_throw_on_fail<T: HasErrors>(
    throw_on_fail: bool,
    mut result: T,
) -> Result<T, TevmFailure> {
    if !throw_on_fail || result.errors().is_empty() {
        return Ok(result);
    }
    let mut errors = result.take_errors();
    if errors.len() == 1 {
        return Err(TevmFailure::Single(errors.remove(0)));
    }
    Err(TevmFailure::Aggregate(errors))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorTag;

    #[derive(Debug, Default)]
    struct Res {
        value: u8,
        errors: Vec<HandlerError>,
    }

    impl HasErrors for Res {
        fn errors(&self) -> &[HandlerError] {
            &self.errors
        }

        fn take_errors(&mut self) -> Vec<HandlerError> {
            std::mem::take(&mut self.errors)
        }
    }

    #[test]
    fn passes_through_without_errors() {
        let res = maybe_throw_on_fail(true, Res { value: 3, errors: vec![] }).unwrap();
        assert_eq!(res.value, 3);
    }

    #[test]
    fn returns_inline_when_not_throwing() {
        let err = HandlerError::new(ErrorTag::Revert, "0x");
        let res = maybe_throw_on_fail(false, Res { value: 1, errors: vec![err.clone()] }).unwrap();
        assert_eq!(res.errors, vec![err]);
    }

    #[test]
    fn single_and_aggregate() {
        let a = HandlerError::new(ErrorTag::InvalidDepth, "too deep");
        let b = HandlerError::new(ErrorTag::InvalidSalt, "too long");

        let single = maybe_throw_on_fail(true, Res { value: 0, errors: vec![a.clone()] });
        assert_eq!(single.unwrap_err(), TevmFailure::Single(a.clone()));

        let agg = maybe_throw_on_fail(true, Res { value: 0, errors: vec![a, b] }).unwrap_err();
        assert_eq!(agg.errors().len(), 2);
        assert!(agg.to_string().starts_with("2 errors occurred"));
    }
}
