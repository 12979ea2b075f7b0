// Discovery host-list expansion
//
// An explicit host list always wins; otherwise the configured range is
// expanded into individual addresses. Two range forms are accepted:
// `a.b.c.0/24` (sweeping .1 through .254) and a dotted numeric range
// `a.b.c.start-end` (the end may repeat the full prefix).

/// Build the candidate host list for a discovery pass.
pub fn expand_hosts(explicit: &[String], subnet: &str) -> Vec<String> {
    let manual: Vec<String> = explicit
        .iter()
        .map(|h| h.trim().to_owned())
        .filter(|h| !h.is_empty())
        .collect();
    if !manual.is_empty() {
        return manual;
    }
    expand_subnet(subnet)
}

/// Expand a subnet/range expression. Unrecognized input yields an empty
/// list (discovery then simply finds nothing).
pub fn expand_subnet(subnet: &str) -> Vec<String> {
    let subnet = subnet.trim();

    if let Some(base) = subnet
        .strip_suffix("/24")
        .and_then(|prefix| prefix.strip_suffix(".0"))
    {
        if is_dotted_triplet(base) {
            return (1..=254).map(|i| format!("{base}.{i}")).collect();
        }
    }

    if let Some((start_part, end_part)) = subnet.split_once('-') {
        if let Some((base, start)) = split_last_octet(start_part) {
            if !is_dotted_triplet(base) {
                return Vec::new();
            }
            // The end is either a bare octet or the full dotted form.
            let end = match split_last_octet(end_part) {
                Some((end_base, end)) => (end_base == base).then_some(end),
                None => end_part.trim().parse().ok(),
            };
            if let Some(end) = end {
                if start <= end {
                    return (start..=end).map(|i| format!("{base}.{i}")).collect();
                }
            }
        }
    }

    Vec::new()
}

fn split_last_octet(s: &str) -> Option<(&str, u8)> {
    let (base, octet) = s.trim().rsplit_once('.')?;
    Some((base, octet.parse().ok()?))
}

fn is_dotted_triplet(s: &str) -> bool {
    let mut count = 0;
    for part in s.split('.') {
        if part.parse::<u8>().is_err() {
            return false;
        }
        count += 1;
    }
    count == 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn slash_24_expands_to_254_hosts() {
        let hosts = expand_subnet("10.0.0.0/24");
        assert_eq!(hosts.len(), 254);
        assert_eq!(hosts.first().map(String::as_str), Some("10.0.0.1"));
        assert_eq!(hosts.last().map(String::as_str), Some("10.0.0.254"));
    }

    #[test]
    fn dotted_range_expands_inclusively() {
        assert_eq!(
            expand_subnet("192.168.1.10-192.168.1.12"),
            vec!["192.168.1.10", "192.168.1.11", "192.168.1.12"]
        );
        assert_eq!(
            expand_subnet("192.168.1.10-12"),
            vec!["192.168.1.10", "192.168.1.11", "192.168.1.12"]
        );
        assert_eq!(expand_subnet("192.168.1.5-5"), vec!["192.168.1.5"]);
    }

    #[test]
    fn mismatched_or_inverted_ranges_yield_nothing() {
        assert!(expand_subnet("192.168.1.10-192.168.2.12").is_empty());
        assert!(expand_subnet("192.168.1.12-192.168.1.10").is_empty());
    }

    #[test]
    fn garbage_yields_nothing() {
        assert!(expand_subnet("").is_empty());
        assert!(expand_subnet("not-a-subnet").is_empty());
        assert!(expand_subnet("10.0.0.0/16").is_empty());
        assert!(expand_subnet("10.0.300.0/24").is_empty());
    }

    #[test]
    fn explicit_hosts_override_the_subnet() {
        let explicit = vec![" 10.0.0.5 ".to_owned(), String::new(), "10.0.0.9".to_owned()];
        assert_eq!(
            expand_hosts(&explicit, "10.0.0.0/24"),
            vec!["10.0.0.5", "10.0.0.9"]
        );
        assert_eq!(expand_hosts(&[], "10.0.0.0/24").len(), 254);
    }
}
