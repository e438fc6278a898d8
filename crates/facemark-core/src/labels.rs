//! Gallery labels: an employee name, optionally with an `_<n>` enrollment
//! counter (`alice`, `alice_2`).

/// Strip a trailing `_<digits>` enrollment counter: `alice_2` → `alice`.
pub fn label_base(identity: &str) -> Option<&str> {
    let (base, counter) = label_parts(identity)?;
    counter.parse::<u64>().ok()?;
    Some(base)
}

/// Name to show for a label: the base if it carries a counter, else the label.
pub fn display_name(identity: &str) -> &str {
    label_base(identity).unwrap_or(identity)
}

/// The first unused counter label for `name`, given labels already taken.
///
/// Counters start at 1 and continue after the highest one in use, so gaps
/// left by deleted images are not reused.
pub fn next_label<'a>(name: &str, existing: impl IntoIterator<Item = &'a str>) -> String {
    let highest = existing
        .into_iter()
        .filter_map(|label| {
            let (base, counter) = label_parts(label)?;
            if base != name {
                return None;
            }
            counter.parse::<u64>().ok()
        })
        .max()
        .unwrap_or(0);
    format!("{name}_{}", highest + 1)
}

fn label_parts(identity: &str) -> Option<(&str, &str)> {
    let (base, counter) = identity.rsplit_once('_')?;
    if base.is_empty() || counter.is_empty() || !counter.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((base, counter))
}
