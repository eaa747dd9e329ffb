use tracing::debug;

/// Scoped acquisition helper: holds an acquired handle together with its
/// release action and guarantees the release runs exactly once, on every
/// exit path.
///
/// Both controllers wrap their [`DeviceHandle`](crate::DeviceHandle) in a
/// guard so that explicit release (freeze, dispose), error paths, and plain
/// drops all converge on the same teardown.
pub struct ResourceGuard<H> {
    handle: Option<H>,
    release: Option<Box<dyn FnOnce(H) + Send>>,
}

impl<H> ResourceGuard<H> {
    pub fn new<F>(handle: H, release: F) -> Self
    where
        F: FnOnce(H) + Send + 'static,
    {
        Self {
            handle: Some(handle),
            release: Some(Box::new(release)),
        }
    }

    /// The held handle, if not yet released or disarmed
    pub fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    pub fn is_held(&self) -> bool {
        self.handle.is_some()
    }

    /// Run the release action now. Idempotent: subsequent calls and the
    /// eventual drop are no-ops.
    pub fn release(&mut self) {
        if let (Some(handle), Some(release)) = (self.handle.take(), self.release.take()) {
            release(handle);
        }
    }

    /// Forget the handle without invoking the release action.
    ///
    /// Used when the device was revoked externally: the handle is dead and
    /// must not be passed back to the source.
    pub fn disarm(&mut self) {
        if self.handle.take().is_some() {
            debug!("Resource guard disarmed without release");
        }
        self.release.take();
    }
}

impl<H> Drop for ResourceGuard<H> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<H: std::fmt::Debug> std::fmt::Debug for ResourceGuard<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("handle", &self.handle)
            .finish()
    }
}
