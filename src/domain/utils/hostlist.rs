use crate::error::{Error, Result};

/// Expands a hostlist expression such as `"node[0-3,7],login1"` into its
/// hostnames, preserving order. Zero padding in ranges is kept
/// (`"n[01-03]"` yields `n01 n02 n03`).
pub fn decode(expr: &str) -> Result<Vec<String>> {
    decode_limited(expr, usize::MAX)
}

/// Like [`decode`], but fails with `InvalidArgument` before expanding
/// more than `max_hosts` names.
pub fn decode_limited(expr: &str, max_hosts: usize) -> Result<Vec<String>> {
    let mut hosts = Vec::new();
    for term in split_top_level(expr)? {
        let term = term.trim();
        if term.is_empty() {
            continue;
        }
        match term.find('[') {
            None => {
                if hosts.len() >= max_hosts {
                    return Err(too_many(expr));
                }
                hosts.push(term.to_string());
            }
            Some(open) => {
                let close = term[open..]
                    .find(']')
                    .map(|pos| open + pos)
                    .ok_or_else(|| Error::InvalidArgument(format!("invalid hostlist '{}'", expr)))?;
                let prefix = &term[..open];
                let suffix = &term[close + 1..];
                for (value, width) in parse_ranges(&term[open + 1..close], expr, max_hosts - hosts.len())? {
                    hosts.push(format!("{}{:0width$}{}", prefix, value, suffix, width = width));
                }
            }
        }
    }
    Ok(hosts)
}

/// Compresses hostnames into a hostlist expression, merging consecutive
/// hosts that share a prefix and numeric width. Order is preserved.
pub fn encode<S: AsRef<str>>(hosts: &[S]) -> String {
    let mut groups: Vec<(String, usize, Vec<u64>)> = Vec::new();
    let mut terms: Vec<String> = Vec::new();

    for host in hosts {
        let host = host.as_ref();
        match split_numeric_suffix(host) {
            Some((prefix, value, width, digits)) => {
                if let Some((last_prefix, last_width, values)) = groups.last_mut() {
                    let same_width = *last_width == width || (width == 0 && digits == *last_width);
                    if *last_prefix == prefix && same_width {
                        values.push(value);
                        continue;
                    }
                }
                flush_groups(&mut groups, &mut terms);
                groups.push((prefix.to_string(), width, vec![value]));
            }
            None => {
                flush_groups(&mut groups, &mut terms);
                terms.push(host.to_string());
            }
        }
    }
    flush_groups(&mut groups, &mut terms);
    terms.join(",")
}

fn flush_groups(groups: &mut Vec<(String, usize, Vec<u64>)>, terms: &mut Vec<String>) {
    for (prefix, width, values) in groups.drain(..) {
        if values.len() == 1 {
            terms.push(format!("{}{:0width$}", prefix, values[0], width = width));
            continue;
        }
        let mut ranges = Vec::new();
        let mut iter = values.iter().copied().peekable();
        while let Some(lo) = iter.next() {
            let mut hi = lo;
            while iter.peek() == Some(&(hi + 1)) {
                hi += 1;
                iter.next();
            }
            if lo == hi {
                ranges.push(format!("{:0width$}", lo, width = width));
            } else {
                ranges.push(format!("{:0width$}-{:0width$}", lo, hi, width = width));
            }
        }
        terms.push(format!("{}[{}]", prefix, ranges.join(",")));
    }
}

/// Splits `"node012"` into `("node", 12, 3, 3)`: prefix, value, zero-pad
/// width and digit count. Hosts without a trailing number yield `None`.
fn split_numeric_suffix(host: &str) -> Option<(&str, u64, usize, usize)> {
    let digits = host.bytes().rev().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || digits > 18 {
        return None;
    }
    let split = host.len() - digits;
    let value = host[split..].parse::<u64>().ok()?;
    let width = if host.as_bytes()[split] == b'0' && digits > 1 { digits } else { 0 };
    Some((&host[..split], value, width, digits))
}

fn split_top_level(expr: &str) -> Result<Vec<&str>> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (pos, c) in expr.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth.checked_sub(1).ok_or_else(|| Error::InvalidArgument(format!("invalid hostlist '{}'", expr)))?;
            }
            ',' if depth == 0 => {
                terms.push(&expr[start..pos]);
                start = pos + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Error::InvalidArgument(format!("invalid hostlist '{}'", expr)));
    }
    terms.push(&expr[start..]);
    Ok(terms)
}

fn too_many(expr: &str) -> Error {
    Error::InvalidArgument(format!("hostlist '{}' names too many hosts", expr))
}

/// Expands a bracket body, failing before it yields more than `budget` values.
fn parse_ranges(body: &str, expr: &str, budget: usize) -> Result<Vec<(u64, usize)>> {
    let invalid = || Error::InvalidArgument(format!("invalid hostlist '{}'", expr));
    let mut values = Vec::new();
    for part in body.split(',') {
        let part = part.trim();
        let (lo, hi) = part.split_once('-').unwrap_or((part, part));
        if lo.is_empty() || !lo.bytes().all(|b| b.is_ascii_digit()) || !hi.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let width = if lo.len() > 1 && lo.starts_with('0') { lo.len() } else { 0 };
        let lo_value = lo.parse::<u64>().map_err(|_| invalid())?;
        let hi_value = hi.parse::<u64>().map_err(|_| invalid())?;
        if lo_value > hi_value {
            return Err(invalid());
        }
        if hi_value - lo_value >= (budget - values.len()) as u64 {
            return Err(too_many(expr));
        }
        values.extend((lo_value..=hi_value).map(|value| (value, width)));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ranges_and_singles() {
        let hosts = decode("node[0-2,5],login1").unwrap();
        assert_eq!(hosts, vec!["node0", "node1", "node2", "node5", "login1"]);
    }

    #[test]
    fn test_decode_keeps_padding_and_suffix() {
        let hosts = decode("n[08-10]-ib").unwrap();
        assert_eq!(hosts, vec!["n08-ib", "n09-ib", "n10-ib"]);
    }

    #[test]
    fn test_decode_limited_stops_before_expanding() {
        assert_eq!(decode_limited("node[0-3]", 4).unwrap().len(), 4);
        assert!(matches!(decode_limited("node[0-4000000000]", 4), Err(Error::InvalidArgument(_))));
        assert!(decode_limited("node[0-3],login1", 4).is_err());
        assert!(decode_limited("a,b,c", 2).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("node[1-").is_err());
        assert!(decode("node[a-b]").is_err());
        assert!(decode("node]").is_err());
        assert!(decode("node[3-1]").is_err());
    }

    #[test]
    fn test_encode_compresses() {
        assert_eq!(encode(&["node0", "node1", "node2", "node5", "login1"]), "node[0-2,5],login1");
        assert_eq!(encode(&["n08", "n09", "n10"]), "n[08-10]");
        assert_eq!(encode(&["fluke"]), "fluke");
        assert_eq!(encode::<&str>(&[]), "");
    }

    #[test]
    fn test_encode_then_decode_preserves_order() {
        let hosts = vec!["c3", "c4", "a1", "c9"];
        let expr = encode(&hosts);
        assert_eq!(decode(&expr).unwrap(), hosts);
    }
}
