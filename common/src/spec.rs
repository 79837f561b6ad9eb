//! `[[user@]host[,[user@]host]...]:path` transfer spec string grammar, and
//! the thread-count partitioning used to divide the `-t` total across
//! multiple source hosts.

use crate::error::SpecError;

/// A parsed `user@host` pair. `user` is `None` when not given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub user: Option<String>,
    pub host: String,
}

/// The result of parsing one `spec` argument: zero or more hosts (empty
/// means "localhost") plus the path on that host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSpec {
    pub hosts: Vec<HostSpec>,
    pub path: String,
}

/// Parse a transfer spec string of the form `[[user@]host[,host...]:]path`.
///
/// A spec with no `:` is a bare local path. A spec with exactly one `:`
/// splits into a comma-separated host list (each entry optionally
/// `user@host`) and a path. Any other number of colons, an empty host
/// list entry, or an empty path is rejected.
pub fn parse_spec(spec: &str) -> Result<ParsedSpec, SpecError> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (hosts, path) = match parts.as_slice() {
        [path] => (Vec::new(), (*path).to_string()),
        [hspec, path] => {
            if hspec.is_empty() {
                (Vec::new(), (*path).to_string())
            } else {
                let mut hosts = Vec::new();
                for entry in hspec.split(',') {
                    if entry.is_empty() {
                        return Err(SpecError::EmptyHostEntry(spec.to_string()));
                    }
                    let uh: Vec<&str> = entry.split('@').collect();
                    match uh.as_slice() {
                        [host] => hosts.push(HostSpec {
                            user: None,
                            host: (*host).to_string(),
                        }),
                        [user, host] if !user.is_empty() && !host.is_empty() => {
                            hosts.push(HostSpec {
                                user: Some((*user).to_string()),
                                host: (*host).to_string(),
                            })
                        }
                        _ => return Err(SpecError::EmptyHostEntry(spec.to_string())),
                    }
                }
                if hosts.is_empty() {
                    return Err(SpecError::EmptyHostList(spec.to_string()));
                }
                (hosts, (*path).to_string())
            }
        }
        _ => return Err(SpecError::MalformedSpec(spec.to_string())),
    };
    if path.is_empty() {
        return Err(SpecError::EmptyPath(spec.to_string()));
    }
    Ok(ParsedSpec { hosts, path })
}

/// Divide `total` threads evenly across `buckets`, spreading the remainder
/// across the leading buckets one each.
pub fn partition_threads(total: u32, buckets: u32) -> Vec<u32> {
    if buckets == 0 {
        return Vec::new();
    }
    let base = total / buckets;
    let remainder = total % buckets;
    (0..buckets)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_local_path() {
        let parsed = parse_spec("/tmp/file").unwrap();
        assert!(parsed.hosts.is_empty());
        assert_eq!(parsed.path, "/tmp/file");
    }

    #[test]
    fn single_host_no_user() {
        let parsed = parse_spec("hostA:/tmp/file").unwrap();
        assert_eq!(
            parsed.hosts,
            vec![HostSpec {
                user: None,
                host: "hostA".to_string()
            }]
        );
        assert_eq!(parsed.path, "/tmp/file");
    }

    #[test]
    fn multiple_hosts_with_users() {
        let parsed = parse_spec("alice@hostA,bob@hostB:/tmp/file").unwrap();
        assert_eq!(parsed.hosts.len(), 2);
        assert_eq!(parsed.hosts[0].user.as_deref(), Some("alice"));
        assert_eq!(parsed.hosts[1].host, "hostB");
    }

    #[test]
    fn mixed_user_and_no_user_hosts() {
        let parsed = parse_spec("hostA,bob@hostB:/tmp/file").unwrap();
        assert!(parsed.hosts[0].user.is_none());
        assert_eq!(parsed.hosts[1].user.as_deref(), Some("bob"));
    }

    #[test]
    fn too_many_colons_is_rejected() {
        assert!(parse_spec("a:b:c").is_err());
    }

    #[test]
    fn empty_path_is_rejected() {
        assert!(parse_spec("hostA:").is_err());
    }

    #[test]
    fn empty_host_entry_is_rejected() {
        assert!(parse_spec("hostA,,hostB:/tmp/file").is_err());
    }

    #[test]
    fn malformed_user_at_host_is_rejected() {
        assert!(parse_spec("@hostA:/tmp/file").is_err());
        assert!(parse_spec("alice@:/tmp/file").is_err());
    }

    #[test]
    fn partition_threads_even_split() {
        assert_eq!(partition_threads(8, 4), vec![2, 2, 2, 2]);
    }

    #[test]
    fn partition_threads_remainder_goes_to_leading_buckets() {
        assert_eq!(partition_threads(10, 4), vec![3, 3, 2, 2]);
        assert_eq!(partition_threads(1, 3), vec![1, 0, 0]);
    }
}
