/// Runs the contained closure when dropped, unless disarmed.
pub(crate) struct CallOnDrop {
    f: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl CallOnDrop {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            f: Some(Box::new(f)),
        }
    }

    /// Runs the closure now instead of on drop.
    pub fn call(mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}

impl Drop for CallOnDrop {
    fn drop(&mut self) {
        if let Some(f) = self.f.take() {
            f();
        }
    }
}
