//! Reference decapsulation on outbound action parameters.
//!
//! Action parameters are walked recursively (objects, arrays, strings);
//! every `{SECRET:<uuid>:<description>}` token found is resolved against
//! the store and substituted with plaintext **only** when the secret's
//! auto-decapsulation list admits the action being performed. Disallowed
//! references are left untouched, so the outbound surface carries the
//! opaque token verbatim.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::patterns::Sensitivity;
use crate::store::{SecretsStore, StoreError};

/// Matches `{SECRET:<uuid>:<description>}` reference tokens.
static SECRET_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{SECRET:([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}):([^}]*)\}")
        .unwrap_or_else(|_| unreachable!("static secret-reference pattern is valid"))
});

// ── Allow matrix ───────────────────────────────────────────────────────

/// Default action names permitted to auto-decapsulate a secret of the
/// given sensitivity.
#[must_use]
pub fn auto_decapsulate_actions(sensitivity: Sensitivity) -> &'static [&'static str] {
    match sensitivity {
        // Critical secrets require a manual recall.
        Sensitivity::Critical => &[],
        Sensitivity::High => &["tool"],
        Sensitivity::Medium => &["tool", "speak"],
        Sensitivity::Low => &["tool", "speak", "memorize"],
    }
}

// ── Reports ────────────────────────────────────────────────────────────

/// Outcome of one decapsulation pass over a parameter tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecapsulationReport {
    /// References replaced with plaintext.
    pub substituted: Vec<Uuid>,
    /// References left in place because the action is not on the secret's
    /// allow list (or the secret is manual-access-only).
    pub withheld: Vec<Uuid>,
    /// References whose uuid resolved to no stored secret.
    pub unresolved: Vec<Uuid>,
}

impl DecapsulationReport {
    /// True when the pass changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.substituted.is_empty()
    }
}

// ── Walk ───────────────────────────────────────────────────────────────

/// Find all reference tokens in a text fragment.
#[must_use]
pub fn find_references(text: &str) -> Vec<Uuid> {
    SECRET_REF
        .captures_iter(text)
        .filter_map(|cap| Uuid::parse_str(&cap[1]).ok())
        .collect()
}

/// Walk `value` recursively and substitute permitted references in place.
///
/// `action` is the lower-case handler action name (`"speak"`, `"tool"`,
/// `"memorize"`, …); `accessor` identifies who is acting for the access
/// log and rate limiter.
///
/// # Errors
///
/// Returns [`StoreError`] on rate limiting or database failures. The value
/// may be partially substituted when an error interrupts the walk; callers
/// treat that as a failed egress and discard the parameters.
pub async fn decapsulate_value(
    value: &mut Value,
    action: &str,
    accessor: &str,
    store: &SecretsStore,
) -> Result<DecapsulationReport, StoreError> {
    let mut report = DecapsulationReport::default();
    walk(value, action, accessor, store, &mut report).await?;
    Ok(report)
}

/// Recursion implemented iteratively over a worklist: `serde_json::Value`
/// trees from action parameters are shallow, but boxing a recursive async
/// fn for them buys nothing.
async fn walk(
    value: &mut Value,
    action: &str,
    accessor: &str,
    store: &SecretsStore,
    report: &mut DecapsulationReport,
) -> Result<(), StoreError> {
    let mut stack: Vec<&mut Value> = vec![value];

    while let Some(current) = stack.pop() {
        match current {
            Value::String(text) => {
                if SECRET_REF.is_match(text) {
                    let replaced = substitute(text, action, accessor, store, report).await?;
                    *text = replaced;
                }
            }
            Value::Array(items) => stack.extend(items.iter_mut()),
            Value::Object(map) => stack.extend(map.values_mut()),
            _ => {}
        }
    }

    Ok(())
}

async fn substitute(
    text: &str,
    action: &str,
    accessor: &str,
    store: &SecretsStore,
    report: &mut DecapsulationReport,
) -> Result<String, StoreError> {
    let mut result = String::with_capacity(text.len());
    let mut cursor = 0usize;

    // Collect matches first so the async store calls don't borrow the regex
    // iterator across awaits.
    let matches: Vec<(std::ops::Range<usize>, Uuid)> = SECRET_REF
        .captures_iter(text)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            let uuid = Uuid::parse_str(&cap[1]).ok()?;
            Some((whole.range(), uuid))
        })
        .collect();

    for (range, uuid) in matches {
        result.push_str(&text[cursor..range.start]);

        let record = store
            .retrieve(uuid, accessor, "auto decapsulation", true)
            .await?;
        match record {
            Some(record)
                if !record.manual_access_only
                    && record
                        .auto_decapsulate_for_actions
                        .iter()
                        .any(|allowed| allowed == action) =>
            {
                let plaintext = store.decrypt_value(&record).await?;
                result.push_str(&plaintext);
                report.substituted.push(uuid);
            }
            Some(_) => {
                result.push_str(&text[range.clone()]);
                report.withheld.push(uuid);
            }
            None => {
                result.push_str(&text[range.clone()]);
                report.unresolved.push(uuid);
            }
        }
        cursor = range.end;
    }

    result.push_str(&text[cursor..]);
    Ok(result)
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_matrix_shapes() {
        assert!(auto_decapsulate_actions(Sensitivity::Critical).is_empty());
        assert_eq!(auto_decapsulate_actions(Sensitivity::High), &["tool"]);
        assert_eq!(
            auto_decapsulate_actions(Sensitivity::Medium),
            &["tool", "speak"]
        );
        assert_eq!(
            auto_decapsulate_actions(Sensitivity::Low),
            &["tool", "speak", "memorize"]
        );
    }

    #[test]
    fn reference_regex_extracts_uuid() {
        let uuid = Uuid::new_v4();
        let text = format!("before {{SECRET:{uuid}:API Key}} after");
        let found = find_references(&text);
        assert_eq!(found, vec![uuid]);
    }

    #[test]
    fn reference_regex_ignores_malformed_tokens() {
        assert!(find_references("{SECRET:not-a-uuid:oops}").is_empty());
        assert!(find_references("{SECRET:}").is_empty());
        assert!(find_references("plain text").is_empty());
    }
}
