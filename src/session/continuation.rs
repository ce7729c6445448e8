use crate::foundation::error::MuxError;

type SuccessFn = Box<dyn FnOnce() + Send>;
type FailureFn = Box<dyn FnOnce(Option<MuxError>) + Send>;

/// One-shot pair of terminal callbacks.
///
/// Exactly one of the two fires, at most once; firing consumes both.
pub struct Completion {
    callbacks: Option<(SuccessFn, FailureFn)>,
}

impl Completion {
    pub fn new<S, F>(success: S, failure: F) -> Self
    where
        S: FnOnce() + Send + 'static,
        F: FnOnce(Option<MuxError>) + Send + 'static,
    {
        Self {
            callbacks: Some((Box::new(success), Box::new(failure))),
        }
    }

    /// A completion whose callbacks do nothing.
    pub fn detached() -> Self {
        Self::new(|| {}, |_| {})
    }

    pub fn is_spent(&self) -> bool {
        self.callbacks.is_none()
    }

    /// Fire the success callback; `false` if the completion was already spent.
    pub fn succeed(&mut self) -> bool {
        match self.callbacks.take() {
            Some((success, _)) => {
                success();
                true
            }
            None => false,
        }
    }

    /// Fire the failure callback; `false` if the completion was already spent.
    pub fn fail(&mut self, err: Option<MuxError>) -> bool {
        match self.callbacks.take() {
            Some((_, failure)) => {
                failure(err);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("spent", &self.is_spent())
            .finish()
    }
}
