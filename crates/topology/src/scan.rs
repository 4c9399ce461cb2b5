use nebula_protocol::{ScanResult, ServiceEntry};
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(300);

/// Well-known local AI tooling ports, in report order.
pub const AI_SERVICES: &[(u16, &str)] = &[
    (11434, "Ollama"),
    (8188, "ComfyUI"),
    (7860, "Stable Diffusion"),
    (4000, "Pinokio"),
    (1234, "LM Studio"),
];

/// Checks a fixed port table on one host. A port counts as open only when the TCP connect
/// completes within the connect timeout; refused, unreachable and timed-out ports are all "absent".
#[derive(Debug, Clone)]
pub struct PortScanner {
    services: Vec<ServiceEntry>,
    connect_timeout: Duration,
    concurrency: usize,
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new(
            AI_SERVICES
                .iter()
                .map(|&(port, name)| ServiceEntry {
                    name: name.to_string(),
                    port,
                }),
        )
    }
}

impl PortScanner {
    pub fn new(services: impl IntoIterator<Item = ServiceEntry>) -> Self {
        let services: Vec<ServiceEntry> = services.into_iter().collect();
        let concurrency = services.len().max(1);
        Self {
            services,
            connect_timeout: CONNECT_TIMEOUT,
            concurrency,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn services(&self) -> &[ServiceEntry] {
        &self.services
    }

    pub async fn scan(&self, address: &str) -> ScanResult {
        self.scan_with(address, |host: String, port| async move {
            TcpStream::connect((host.as_str(), port)).await.map(drop)
        })
        .await
    }

    /// [`Self::scan`] with the TCP connect swapped out.
    pub(crate) async fn scan_with<C, F>(&self, address: &str, connect: C) -> ScanResult
    where
        C: Fn(String, u16) -> F + Clone + Send + 'static,
        F: Future<Output = io::Result<()>> + Send + 'static,
    {
        let target = address.trim();
        let host = target
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(target)
            .to_string();

        let mut open = vec![false; self.services.len()];
        if !host.is_empty() {
            let permits = Arc::new(Semaphore::new(self.concurrency));
            let mut attempts = JoinSet::new();
            for (idx, service) in self.services.iter().enumerate() {
                let host = host.clone();
                let port = service.port;
                let timeout = self.connect_timeout;
                let permits = permits.clone();
                let connect = connect.clone();
                attempts.spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    let attempt = connect(host.clone(), port);
                    (idx, port_answers(attempt, &host, port, timeout).await)
                });
            }
            while let Some(joined) = attempts.join_next().await {
                match joined {
                    Ok((idx, is_open)) => open[idx] = is_open,
                    Err(err) => log::warn!("port check task failed: {err}"),
                }
            }
        }

        let services = self
            .services
            .iter()
            .zip(open)
            .filter_map(|(service, is_open)| is_open.then(|| service.clone()))
            .collect();
        ScanResult {
            target_address: target.to_string(),
            services,
        }
    }
}

async fn port_answers(
    attempt: impl Future<Output = io::Result<()>>,
    host: &str,
    port: u16,
    timeout: Duration,
) -> bool {
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            log::trace!("{host}:{port} closed: {err}");
            false
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Instant;
    use tokio::net::TcpListener;

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn default_table_is_the_ai_service_set() {
        let scanner = PortScanner::default();
        let ports: Vec<u16> = scanner.services().iter().map(|s| s.port).collect();
        assert_eq!(ports, vec![11434, 8188, 7860, 4000, 1234]);
    }

    #[tokio::test]
    async fn reports_open_ports_in_table_order() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed = closed_port().await;

        let scanner = PortScanner::new([
            ServiceEntry {
                name: "second".to_string(),
                port: second.local_addr().unwrap().port(),
            },
            ServiceEntry {
                name: "closed".to_string(),
                port: closed,
            },
            ServiceEntry {
                name: "first".to_string(),
                port: first.local_addr().unwrap().port(),
            },
        ]);

        let result = scanner.scan("127.0.0.1").await;
        assert_eq!(result.target_address, "127.0.0.1");
        let names: Vec<_> = result.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn no_listeners_yields_empty_services_within_one_timeout() {
        let mut table = Vec::new();
        for idx in 0..5 {
            table.push(ServiceEntry {
                name: format!("svc-{idx}"),
                port: closed_port().await,
            });
        }
        let scanner = PortScanner::new(table);

        let started = Instant::now();
        let result = scanner.scan("127.0.0.1").await;
        assert!(result.services.is_empty());
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    fn stalled(_host: String, _port: u16) -> std::future::Pending<io::Result<()>> {
        std::future::pending()
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connects_cost_one_timeout_not_the_sum() {
        let scanner = PortScanner::default();
        let started = tokio::time::Instant::now();
        let result = scanner.scan_with("10.0.0.7", stalled).await;
        let elapsed = started.elapsed();

        assert!(result.services.is_empty());
        assert!(elapsed >= CONNECT_TIMEOUT, "took {elapsed:?}");
        assert!(elapsed < CONNECT_TIMEOUT * 2, "took {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_serializes_connects() {
        let scanner = PortScanner::default().with_concurrency(1);
        let started = tokio::time::Instant::now();
        scanner.scan_with("10.0.0.7", stalled).await;
        assert!(started.elapsed() >= CONNECT_TIMEOUT * 5);
    }

    #[tokio::test]
    async fn connector_sees_unbracketed_host_and_decides_openness() {
        let result = PortScanner::default()
            .scan_with(" [fd7a::1] ", |host: String, port| async move {
                assert_eq!(host, "fd7a::1");
                if port == 8188 || port == 1234 {
                    Ok(())
                } else {
                    Err(io::Error::from(io::ErrorKind::ConnectionRefused))
                }
            })
            .await;
        assert_eq!(result.target_address, "[fd7a::1]");
        let names: Vec<_> = result.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["ComfyUI", "LM Studio"]);
    }

    #[tokio::test]
    async fn blank_address_connects_nowhere() {
        let result = PortScanner::default().scan("   ").await;
        assert_eq!(result.target_address, "");
        assert!(result.services.is_empty());
    }

    #[tokio::test]
    async fn bracketed_ipv6_is_accepted() {
        let result = PortScanner::new([ServiceEntry {
            name: "closed".to_string(),
            port: closed_port().await,
        }])
        .scan("[::1]")
        .await;
        assert_eq!(result.target_address, "[::1]");
        assert!(result.services.is_empty());
    }
}
