//! Sinks for metric payloads.
use crate::diag_info;
use crate::error::{DiagnosticsError, DiagnosticsResult, TransportError};
use std::fmt::Debug;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use url::Url;

/// Max size of datagram in bytes
const UDP_PACKET_MAX_LENGTH: usize = 65000;

/// Something that accepts newline separated metric lines.
pub trait MetricsTransport: Send + Sync + Debug {
    /// Send one payload. A payload is one or more `name:value|kind` lines
    /// joined with `\n`.
    fn send(&self, payload: &str) -> Result<(), TransportError>;
}

/// Sends payloads over UDP, splitting at line boundaries when a payload does
/// not fit in one datagram.
#[derive(Debug)]
pub struct UdpTransport {
    conn: UdpSocket,
    max_packet_size: usize,
}

impl UdpTransport {
    /// Connect to the `udp://host:port` address in `url`.
    pub fn from_url(url: &str) -> DiagnosticsResult<Self> {
        let parsed = Url::parse(url).map_err(|err| {
            DiagnosticsError::Configuration(format!("invalid metrics url {url:?}: {err}"))
        })?;
        if parsed.scheme() != "udp" {
            return Err(DiagnosticsError::Configuration(format!(
                "metrics url {url:?} must use the udp:// scheme"
            )));
        }
        if parsed.host().is_none() || parsed.port().is_none() {
            return Err(DiagnosticsError::Configuration(format!(
                "metrics url {url:?} must name a host and a port"
            )));
        }

        parsed
            .socket_addrs(|| None)
            .and_then(|addrs| Self::connect(&addrs[..]))
            .map_err(|err| {
                DiagnosticsError::Configuration(format!("cannot reach metrics host {url:?}: {err}"))
            })
    }

    fn connect<A: ToSocketAddrs>(host_port: A) -> io::Result<Self> {
        let target = host_port.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "host resolved to no address")
        })?;
        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let conn = UdpSocket::bind(local)?;
        conn.connect(target)?;
        Ok(UdpTransport {
            conn,
            max_packet_size: UDP_PACKET_MAX_LENGTH,
        })
    }
}

impl MetricsTransport for UdpTransport {
    fn send(&self, payload: &str) -> Result<(), TransportError> {
        for datagram in split_datagrams(payload, self.max_packet_size)? {
            self.conn.send(datagram.as_bytes())?;
        }
        Ok(())
    }
}

/// Pack the lines of `payload` into datagrams of at most `max_len` bytes,
/// never cutting a line in two. A single line longer than `max_len` is an
/// error and nothing is sent.
fn split_datagrams(payload: &str, max_len: usize) -> Result<Vec<&str>, TransportError> {
    if payload.len() <= max_len {
        return Ok(vec![payload]);
    }
    let mut datagrams = Vec::new();
    // byte offsets of the datagram being packed
    let (mut start, mut end) = (0, 0);
    let mut offset = 0;
    for line in payload.split('\n') {
        if line.len() > max_len {
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "metric line ({} bytes) is larger than max packet size ({} bytes)",
                    line.len(),
                    max_len
                ),
            )));
        }
        let line_end = offset + line.len();
        if line_end - start > max_len {
            datagrams.push(&payload[start..end]);
            start = offset;
        }
        end = line_end;
        offset = line_end + 1;
    }
    if end > start {
        datagrams.push(&payload[start..end]);
    }
    Ok(datagrams)
}

/// Debug transport: writes every payload to the internal log.
#[derive(Debug, Clone, Default)]
pub struct LogTransport {
    _private: (),
}

impl MetricsTransport for LogTransport {
    fn send(&self, payload: &str) -> Result<(), TransportError> {
        diag_info!(name: "LogTransport.Send", payload = payload.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn udp_transport_sends_one_datagram_per_payload() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();
        let transport = UdpTransport::from_url(&format!("udp://127.0.0.1:{port}")).unwrap();

        transport.send("shop.timer:12|ms\nshop.hits:1|c").unwrap();

        let mut buf = [0u8; 128];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"shop.timer:12|ms\nshop.hits:1|c");
    }

    #[test]
    fn large_payload_is_split_at_line_boundaries() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();
        let transport = UdpTransport::from_url(&format!("udp://127.0.0.1:{port}")).unwrap();

        let lines: Vec<String> = (0..5000).map(|i| format!("shop.hits.{i:05}:1|c")).collect();
        let payload = lines.join("\n");
        assert!(payload.len() > UDP_PACKET_MAX_LENGTH);

        transport.send(&payload).unwrap();

        let mut received = Vec::new();
        let mut buf = vec![0u8; UDP_PACKET_MAX_LENGTH + 1];
        while received.len() < lines.len() {
            let len = receiver.recv(&mut buf).unwrap();
            assert!(len <= UDP_PACKET_MAX_LENGTH);
            let datagram = std::str::from_utf8(&buf[..len]).unwrap();
            received.extend(datagram.split('\n').map(str::to_owned));
        }
        assert_eq!(received, lines);
    }

    #[test]
    fn datagrams_never_cut_a_line() {
        let payload = "aaa\nbb\ncccc\nd";
        assert_eq!(
            split_datagrams(payload, 6).unwrap(),
            vec!["aaa\nbb", "cccc\nd"]
        );
        assert_eq!(split_datagrams(payload, 64).unwrap(), vec![payload]);
        assert!(split_datagrams(payload, 3).is_err());
    }

    #[test]
    fn udp_transport_reaches_ipv6_hosts() {
        // Hosts without an IPv6 loopback cannot run this.
        let Ok(receiver) = UdpSocket::bind("[::1]:0") else {
            return;
        };
        let port = receiver.local_addr().unwrap().port();
        let transport = UdpTransport::from_url(&format!("udp://[::1]:{port}")).unwrap();

        transport.send("shop.hits:1|c").unwrap();

        let mut buf = [0u8; 64];
        let len = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"shop.hits:1|c");
    }

    #[test]
    fn oversized_line_is_rejected() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = receiver.local_addr().unwrap().port();
        let transport = UdpTransport::from_url(&format!("udp://127.0.0.1:{port}")).unwrap();

        let payload = "a".repeat(UDP_PACKET_MAX_LENGTH + 1);
        assert!(matches!(transport.send(&payload), Err(TransportError::Io(_))));
    }

    #[rstest]
    #[case("http://127.0.0.1:8125")]
    #[case("udp://127.0.0.1")]
    #[case("not a url")]
    fn bad_urls_are_configuration_errors(#[case] url: &str) {
        assert!(matches!(
            UdpTransport::from_url(url),
            Err(DiagnosticsError::Configuration(_))
        ));
    }

    #[test]
    fn log_transport_accepts_everything() {
        assert!(LogTransport::default().send("shop.hits:1|c").is_ok());
    }
}
