use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CrawlError;

/// Immutable configuration bound to one worker for its entire lifetime,
/// including across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    /// Outbound address requests are bound to. `None` lets the OS pick.
    pub egress: Option<IpAddr>,
    /// Minimum inter-request interval for this identity.
    pub interval: Duration,
    /// Position of this identity within the pool.
    pub rank: usize,
}

impl WorkerIdentity {
    pub fn new(egress: Option<IpAddr>, interval: Duration, rank: usize) -> Self {
        Self {
            egress,
            interval,
            rank,
        }
    }

    /// A short label for logging, e.g. `"192.168.0.7"` or `"worker-3"`.
    pub fn label(&self) -> String {
        match self.egress {
            Some(ip) => ip.to_string(),
            None => format!("worker-{}", self.rank),
        }
    }
}

/// Parse identity specs of the form `"10.0.0.4"` or `"10.0.0.4:3"`, where
/// the suffix overrides the default inter-request interval in seconds.
pub fn parse_identity_list(
    specs: &[String],
    default_interval: Duration,
) -> Result<Vec<WorkerIdentity>, CrawlError> {
    specs
        .iter()
        .enumerate()
        .map(|(rank, spec)| {
            let (ip_part, interval) = match spec.split_once(':') {
                Some((ip, secs)) => {
                    let secs: u64 = secs
                        .parse()
                        .map_err(|_| CrawlError::Config(format!("invalid interval in {spec:?}")))?;
                    (ip, Duration::from_secs(secs))
                }
                None => (spec.as_str(), default_interval),
            };
            let egress: IpAddr = ip_part
                .parse()
                .map_err(|_| CrawlError::Config(format!("invalid egress address {ip_part:?}")))?;
            Ok(WorkerIdentity::new(Some(egress), interval, rank))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_specs() {
        let specs = vec!["10.0.0.4".to_string(), "10.0.0.5:3".to_string()];
        let ids = parse_identity_list(&specs, Duration::from_secs(1)).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0].interval, Duration::from_secs(1));
        assert_eq!(ids[0].rank, 0);
        assert_eq!(ids[1].interval, Duration::from_secs(3));
        assert_eq!(ids[1].egress, Some("10.0.0.5".parse().unwrap()));
        assert_eq!(ids[1].rank, 1);
    }

    #[test]
    fn rejects_bad_specs() {
        let err = parse_identity_list(&["not-an-ip".to_string()], Duration::from_secs(1));
        assert!(matches!(err, Err(CrawlError::Config(_))));

        let err = parse_identity_list(&["10.0.0.4:soon".to_string()], Duration::from_secs(1));
        assert!(matches!(err, Err(CrawlError::Config(_))));
    }

    #[test]
    fn label_falls_back_to_rank() {
        let id = WorkerIdentity::new(None, Duration::from_secs(1), 2);
        assert_eq!(id.label(), "worker-2");
    }
}
