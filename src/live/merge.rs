//! Transcript merge engine.
//!
//! Combines the REST snapshot, the entries delivered by the live channel and the
//! entries sent locally by the supervisor into one ordered transcript. The order
//! is insertion order (snapshot, then channel arrival, then local send); entries
//! are never re-sorted by `create_time`, so out-of-order channel delivery shows
//! up out of order.

use crate::live::entry::TranscriptEntry;

/// Result of one merge pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeOutcome {
    /// Deduplicated transcript in display order.
    pub entries: Vec<TranscriptEntry>,
    /// The most recent customer/agent utterance came from the customer.
    pub customer_awaiting_reply: bool,
    /// At least one entry is a takeover marker.
    pub has_takeover_marker: bool,
}

/// Merge the three sources into one transcript.
///
/// The snapshot is taken as-is. Channel entries, then local entries, are
/// appended unless an entry with the same `(text, create_time)` is already
/// present. Malformed entries are always appended.
#[must_use]
pub fn merge(
    initial: &[TranscriptEntry],
    channel: &[TranscriptEntry],
    local: &[TranscriptEntry],
) -> MergeOutcome {
    let mut entries: Vec<TranscriptEntry> =
        Vec::with_capacity(initial.len() + channel.len() + local.len());
    entries.extend_from_slice(initial);

    for entry in channel.iter().chain(local) {
        append_if_absent(&mut entries, entry);
    }

    let customer_awaiting_reply = entries
        .iter()
        .rev()
        .find(|entry| entry.is_customer() || entry.is_agent())
        .is_some_and(TranscriptEntry::is_customer);
    let has_takeover_marker = entries.iter().any(TranscriptEntry::is_takeover);

    MergeOutcome {
        entries,
        customer_awaiting_reply,
        has_takeover_marker,
    }
}

/// Append `entry` unless the accumulator already holds the same entry.
///
/// Returns whether the entry was appended.
pub fn append_if_absent(accumulator: &mut Vec<TranscriptEntry>, entry: &TranscriptEntry) -> bool {
    if accumulator.iter().any(|existing| existing.same_entry(entry)) {
        return false;
    }
    accumulator.push(entry.clone());
    true
}
