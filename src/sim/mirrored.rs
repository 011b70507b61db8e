use bytemuck::Pod;

/// A host value that shadows a device uniform and tracks whether the
/// device copy is stale.
#[derive(Clone, Debug)]
pub struct DeviceMirrored<T: Pod> {
    value: T,
    dirty: bool,
}

impl<T: Pod> DeviceMirrored<T> {
    // starts dirty so the first flush uploads
    pub fn new(value: T) -> Self {
        Self { value, dirty: true }
    }

    /// Mutable access; the device copy is considered stale afterwards.
    pub fn get(&mut self) -> &mut T {
        self.dirty = true;
        &mut self.value
    }

    pub fn peek(&self) -> &T {
        &self.value
    }

    pub fn set(&mut self, value: T) {
        self.value = value;
        self.dirty = true;
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Runs `upload` with the current value only if it changed since the
    /// last flush. Returns whether an upload happened.
    pub fn flush_if_dirty(&mut self, upload: impl FnOnce(&T)) -> bool {
        if !self.dirty {
            return false;
        }
        upload(&self.value);
        self.dirty = false;
        true
    }
}
