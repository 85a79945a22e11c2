//! Listing document → `RecordingIndex`

use super::{AgentSummary, RecordingIndex};
use echoaudit_common::api::ListingDocument;
use echoaudit_common::NameBook;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Build the index from a listing document
///
/// Total: any document yields a valid index. Ids are kept byte-for-byte
/// since they address the Job Service. Entries with a blank id are
/// skipped; a duplicate id within one organization keeps the first entry.
pub fn build_index(listing: &ListingDocument, names: &NameBook) -> RecordingIndex {
    let mut periods = BTreeMap::new();

    for (period, organizations) in listing {
        let mut orgs = BTreeMap::new();

        for (organization, entries) in organizations {
            let mut seen = HashSet::new();
            let mut agents = Vec::with_capacity(entries.len());

            for entry in entries {
                let id = entry.id.as_str();
                if id.trim().is_empty() {
                    warn!(period = %period, organization = %organization, "Skipping agent entry without id");
                    continue;
                }
                if !seen.insert(id.to_string()) {
                    warn!(period = %period, organization = %organization, agent = %id, "Duplicate agent id, keeping first entry");
                    continue;
                }

                agents.push(AgentSummary {
                    id: id.to_string(),
                    display_name: names.agent_name(id, entry.name.as_deref()),
                    call_count: entry.calls_count,
                    has_weekly_report: entry.has_weekly_report,
                });
            }

            orgs.insert(organization.clone(), agents);
        }

        periods.insert(period.clone(), orgs);
    }

    RecordingIndex::from_periods(periods)
}
