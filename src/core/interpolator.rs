// src/core/interpolator.rs

//! `$<NAME>` placeholder substitution.
//!
//! Two disciplines are used. Values substituted into command text are escaped
//! (`\` and `"` gain a backslash) so they stay intact inside a double-quoted
//! shell word. Values substituted into other environment values are copied raw.
//! Nothing is ever unescaped.

use crate::models::EnvMap;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::BTreeSet;

lazy_static! {
    // Any `$<...>` token whose name could be an environment key.
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\$<([^<>\s]+)>").expect("placeholder pattern is valid");
    // A placeholder still waiting for a value.
    static ref UNRESOLVED_RE: Regex =
        Regex::new(r"\$<[A-Za-z0-9_]+>").expect("unresolved pattern is valid");
}

/// Substitutes every `$<NAME>` whose `NAME` is a key of `env`, escaping the value
/// for a double-quoted shell context.
///
/// With `empty_if_unresolved`, placeholders naming an unknown variable are deleted;
/// otherwise they are left as they are.
pub fn expand_text(text: &str, env: &EnvMap, empty_if_unresolved: bool) -> String {
    substitute(text, env, true, empty_if_unresolved)
}

/// Substitutes known placeholders with their raw values. Unknown ones are kept.
pub fn expand_value(text: &str, env: &EnvMap) -> String {
    substitute(text, env, false, false)
}

/// Whether `text` still holds a placeholder.
pub fn has_unresolved(text: &str) -> bool {
    UNRESOLVED_RE.is_match(text)
}

fn substitute(text: &str, env: &EnvMap, escape: bool, drop_unresolved: bool) -> String {
    substitute_except(text, env, escape, drop_unresolved, None)
}

/// Single pass: substituted values are not rescanned. A placeholder naming `skip`
/// is left untouched.
fn substitute_except(
    text: &str,
    env: &EnvMap,
    escape: bool,
    drop_unresolved: bool,
    skip: Option<&str>,
) -> String {
    PLACEHOLDER_RE
        .replace_all(text, |caps: &Captures<'_>| {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            let name = caps.get(1).map_or("", |m| m.as_str());
            if skip == Some(name) {
                return whole.to_string();
            }
            match env.get(name) {
                Some(value) if escape => escape_for_double_quotes(value),
                Some(value) => value.clone(),
                None if drop_unresolved && UNRESOLVED_RE.is_match(whole) => String::new(),
                None => whole.to_string(),
            }
        })
        .into_owned()
}

fn escape_for_double_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Expands the values of `step` against `global` until a fixed point, leaving every
/// expanded `step` entry merged into `global`.
///
/// The first pass expands all of `step` against `global` as it was on entry, so a
/// value may extend an earlier definition of itself (`PATH: /opt/bin:$<PATH>`).
/// Later passes revisit only names still holding a placeholder, never substitute a
/// name's own placeholder, and stop once a pass changes no value. A cycle therefore
/// settles on a self-reference. Names that never resolve keep their placeholder text.
pub fn expand_recursive(step: &mut EnvMap, global: &mut EnvMap) {
    let mut pending: BTreeSet<String> = step.keys().cloned().collect();
    let mut seen: BTreeSet<Vec<(String, String)>> = BTreeSet::new();
    let mut pass = 0usize;

    loop {
        pass += 1;
        let expanded: Vec<(String, String)> = pending
            .iter()
            .filter_map(|name| {
                let value = step.get(name)?;
                let skip = (pass > 1).then_some(name.as_str());
                Some((name.clone(), substitute_except(value, global, false, false, skip)))
            })
            .collect();

        let changed = expanded
            .iter()
            .any(|(name, value)| step.get(name) != Some(value));

        for (name, value) in expanded {
            global.insert(name.clone(), value.clone());
            step.insert(name, value);
        }

        let remaining: BTreeSet<String> = pending
            .iter()
            .filter(|name| step.get(*name).is_some_and(|v| has_unresolved(v)))
            .cloned()
            .collect();

        log::trace!(
            "Expansion pass {}: {} of {} variable(s) still unresolved",
            pass,
            remaining.len(),
            pending.len()
        );

        // A state seen before means the remaining values only rotate among themselves.
        let snapshot: Vec<(String, String)> = remaining
            .iter()
            .filter_map(|name| Some((name.clone(), step.get(name)?.clone())))
            .collect();
        let repeated = !seen.insert(snapshot);

        // The first pass always continues: it only merged `step` into `global`.
        if remaining.is_empty() || (pass > 1 && (!changed || repeated)) {
            if !remaining.is_empty() {
                log::debug!(
                    "Leaving unresolved placeholders in: {}",
                    remaining.iter().cloned().collect::<Vec<_>>().join(", ")
                );
            }
            break;
        }
        pending = remaining;
    }
}
