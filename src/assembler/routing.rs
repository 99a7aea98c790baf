//! Class routing for decoded fragments.

use evb_format::{EventStatus, EventTag, Fragment};

/// Where a fragment goes, and why it may not be where it asked to go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Class the fragment is merged into.
    pub bucket: EventTag,
    /// The wire tag was not an accepted input class.
    pub unknown_tag: bool,
    /// The fragment's status carried the corrupted bit.
    pub corrupted: bool,
}

/// Maps fragments to classes.
///
/// Regular classes pass through. Corrupted and duplicate tags from upstream
/// are accepted as they are. Anything else, including the incomplete tag
/// which only the builder may assign, is treated as corrupted. A corrupted
/// status bit overrides the tag.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingPolicy;

impl RoutingPolicy {
    /// Pick the class for `fragment`.
    pub fn route(fragment: &Fragment) -> Route {
        let declared = match fragment.event_tag() {
            Some(EventTag::Incomplete) | None => None,
            Some(tag) => Some(tag),
        };
        let corrupted = fragment.status().contains(EventStatus::CORRUPTED);

        let bucket = match declared {
            Some(_) if corrupted => EventTag::Corrupted,
            Some(tag) => tag,
            None => EventTag::Corrupted,
        };

        Route {
            bucket,
            unknown_tag: declared.is_none(),
            corrupted,
        }
    }

    /// Class for a fragment whose source already contributed to its event in
    /// `bucket`. `None` means there is nowhere left to go.
    pub fn on_collision(bucket: EventTag) -> Option<EventTag> {
        (bucket != EventTag::Duplicate).then_some(EventTag::Duplicate)
    }
}
