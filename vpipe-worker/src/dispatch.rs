//! Maps capabilities to their named sub-queue (`logo_detection`,
//! `object_detection`, `text_detection`, `motion_analysis`,
//! `visual_analysis`) — currently one capability per sub-queue, kept as an
//! explicit function rather than an identity so a future many-to-one
//! grouping doesn't need to touch call sites.

use vpipe_core::models::Capability;

#[must_use]
pub fn sub_queue_for(capability: Capability) -> Capability {
    capability
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_queue_is_identity_today() {
        assert_eq!(sub_queue_for(Capability::LogoDetection), Capability::LogoDetection);
    }
}
