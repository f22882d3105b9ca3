//! Shared SPI bus for the two SD surfaces.

use log::{debug, info, warn};

use super::Volume;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Internal,
    External,
}

/// Owner of both SD surfaces.
///
/// Access goes through [`SdBus::internal`] or [`SdBus::external`], which
/// switch the bus first. Both take `&mut self`, so only one surface can be
/// borrowed at a time.
pub struct SdBus<I: Volume, E: Volume> {
    internal: I,
    external: E,
    current: Option<Surface>,
    internal_present: bool,
    external_present: bool,
}

impl<I: Volume, E: Volume> SdBus<I, E> {
    pub fn new(internal: I, external: E) -> Self {
        Self {
            internal,
            external,
            current: None,
            internal_present: false,
            external_present: false,
        }
    }

    fn select(&mut self, surface: Surface) {
        if self.current != Some(surface) {
            debug!("SD bus -> {:?}", surface);
            match surface {
                Surface::Internal => self.internal.activate(),
                Surface::External => self.external.activate(),
            }
            self.current = Some(surface);
        }
    }

    pub fn internal(&mut self) -> &mut I {
        self.select(Surface::Internal);
        &mut self.internal
    }

    pub fn external(&mut self) -> &mut E {
        self.select(Surface::External);
        &mut self.external
    }

    pub fn current(&self) -> Option<Surface> {
        self.current
    }

    pub fn internal_present(&self) -> bool {
        self.internal_present
    }

    pub fn external_present(&self) -> bool {
        self.external_present
    }

    /// Card-detect both surfaces and mount any card that just appeared.
    ///
    /// Returns `true` if either presence flag changed.
    pub fn probe(&mut self) -> bool {
        let (was_internal, was_external) = (self.internal_present, self.external_present);
        let internal = probe_one(self.internal(), was_internal, "internal");
        let external = probe_one(self.external(), was_external, "external");
        self.internal_present = internal;
        self.external_present = external;
        internal != was_internal || external != was_external
    }

    /// Mark the external card unusable after a mid-session failure. The next
    /// probe remounts it if it is still there.
    pub fn mark_external_lost(&mut self) {
        self.external_present = false;
    }
}

fn probe_one<V: Volume>(volume: &mut V, was_present: bool, label: &str) -> bool {
    if !volume.is_present() {
        if was_present {
            warn!("{} SD card removed", label);
        }
        return false;
    }
    if was_present {
        return true;
    }
    match volume.mount() {
        Ok(()) => {
            info!("{} SD card mounted", label);
            true
        }
        Err(e) => {
            warn!("{} SD card mount failed: {}", label, e);
            false
        }
    }
}
