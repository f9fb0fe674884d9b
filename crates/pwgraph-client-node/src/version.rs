//! Protocol versioning (spec §4.10 "Versioning"): each side declares a
//! version; optional features are gated on both sides meeting a minimum.

/// A feature whose availability depends on both peers negotiating a
/// minimum protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Double-buffered `io_async_buffers` handoff under the `ASYNC`
    /// overrun mode.
    AsyncBuffers,
    /// Per-route param application (`ParamRoute`) rather than whole-port.
    ParamRoute,
}

impl Feature {
    /// Minimum version (inclusive) both sides must declare for this
    /// feature to be usable.
    #[must_use]
    pub const fn min_version(self) -> u32 {
        match self {
            Self::AsyncBuffers => 2,
            Self::ParamRoute => 3,
        }
    }
}

/// The versions both sides of a client-node connection have declared
/// (spec §4.10 "each side declares `client_version`/`server_version` in
/// the shared activation record").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedVersion {
    /// Version the client declared.
    pub client_version: u32,
    /// Version the server declared.
    pub server_version: u32,
}

impl NegotiatedVersion {
    /// Pair two declared versions.
    #[must_use]
    pub const fn new(client_version: u32, server_version: u32) -> Self {
        Self {
            client_version,
            server_version,
        }
    }

    /// The effective version: features are gated on the lower of the two,
    /// since both sides must understand a feature for it to be usable.
    #[must_use]
    pub const fn effective(self) -> u32 {
        if self.client_version < self.server_version {
            self.client_version
        } else {
            self.server_version
        }
    }

    /// True if both sides meet `feature`'s minimum version.
    #[must_use]
    pub const fn supports(self, feature: Feature) -> bool {
        self.effective() >= feature.min_version()
    }

    /// Require `feature`, surfacing which version was actually negotiated
    /// for diagnostics.
    ///
    /// # Errors
    ///
    /// [`crate::error::ClientNodeError::FeatureNotNegotiated`] if either
    /// side is below the feature's minimum version.
    pub fn require(self, feature: Feature) -> crate::error::ClientNodeResult<()> {
        if self.supports(feature) {
            Ok(())
        } else {
            Err(crate::error::ClientNodeError::FeatureNotNegotiated {
                required: feature.min_version(),
                negotiated: self.effective(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_version_is_the_lower_of_the_two() {
        let v = NegotiatedVersion::new(3, 2);
        assert_eq!(v.effective(), 2);
    }

    #[test]
    fn feature_gated_on_effective_version() {
        let v = NegotiatedVersion::new(1, 5);
        assert!(!v.supports(Feature::AsyncBuffers));
        assert!(v.require(Feature::AsyncBuffers).is_err());

        let v = NegotiatedVersion::new(3, 3);
        assert!(v.supports(Feature::AsyncBuffers));
        assert!(v.require(Feature::ParamRoute).is_ok());
    }
}
