//! Drawable element host function implementation.
//!
//! Backs the `svg_set_path` import: the guest renders its scene into an SVG
//! path description and hands it over once per frame.

use frame_bridge_core::HostContext;
use tracing::trace;

/// Host implementation of the drawable path element.
pub struct SvgHost;

impl SvgHost {
    /// Replace the path description of the drawable element.
    pub fn set_path(ctx: &mut HostContext, d: &str) {
        let element = &mut ctx.drawable;
        element.d = Some(d.to_string());
        element.updates += 1;

        trace!(
            element_id = %element.element_id,
            len = d.len(),
            updates = element.updates,
            "Path updated"
        );
    }

    /// Current path description, if the guest has set one.
    pub fn current_path(ctx: &HostContext) -> Option<&str> {
        ctx.drawable.d.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_bridge_common::{ExecutionConfig, HostConfig};

    #[test]
    fn test_set_path_replaces() {
        let mut ctx = HostContext::new(
            "test".into(),
            &HostConfig::default(),
            &ExecutionConfig::default(),
        );
        assert_eq!(SvgHost::current_path(&ctx), None);

        SvgHost::set_path(&mut ctx, "M 0 0 L 1 1");
        SvgHost::set_path(&mut ctx, "M 2 2 L 3 3 Z");

        assert_eq!(SvgHost::current_path(&ctx), Some("M 2 2 L 3 3 Z"));
        assert_eq!(ctx.drawable.updates, 2);
    }
}
