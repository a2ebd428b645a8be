//! In-process transport
//!
//! Connects `n` parties running in one process with a full mesh of
//! unbounded channels. Used to drive multi-party jobs locally and in tests.

use std::time::Duration;

use anyhow::{anyhow, Context};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use super::transport::Transport;

/// Default time a receive waits before failing
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// One party's end of a local mesh
pub struct LocalTransport {
    party: u32,
    // outbound[to], inbound[from]
    outbound: Vec<Sender<Vec<u8>>>,
    inbound: Vec<Receiver<Vec<u8>>>,
    timeout: Duration,
}

impl LocalTransport {
    /// Build a mesh for `parties` parties; element `i` belongs to party `i`
    pub fn mesh(parties: usize) -> Vec<LocalTransport> {
        Self::mesh_with_timeout(parties, DEFAULT_RECV_TIMEOUT)
    }

    pub fn mesh_with_timeout(parties: usize, timeout: Duration) -> Vec<LocalTransport> {
        // links[from][to]
        let links: Vec<Vec<(Sender<Vec<u8>>, Receiver<Vec<u8>>)>> = (0..parties)
            .map(|_| (0..parties).map(|_| unbounded()).collect())
            .collect();

        (0..parties)
            .map(|me| LocalTransport {
                party: me as u32,
                outbound: (0..parties).map(|to| links[me][to].0.clone()).collect(),
                inbound: (0..parties).map(|from| links[from][me].1.clone()).collect(),
                timeout,
            })
            .collect()
    }

    pub fn party(&self) -> u32 {
        self.party
    }

    fn peer<T>(list: &[T], party: u32) -> anyhow::Result<&T> {
        list.get(party as usize)
            .ok_or_else(|| anyhow!("party {} is not part of this mesh", party))
    }
}

impl Transport for LocalTransport {
    fn send(&self, to: u32, msg: &[u8]) -> anyhow::Result<()> {
        Self::peer(&self.outbound, to)?
            .send(msg.to_vec())
            .map_err(|_| anyhow!("party {} hung up", to))
    }

    fn receive(&self, from: u32) -> anyhow::Result<Vec<u8>> {
        let received = match Self::peer(&self.inbound, from)?.recv_timeout(self.timeout) {
            Ok(msg) => Ok(msg),
            Err(RecvTimeoutError::Timeout) => Err(anyhow!("timed out waiting for party {}", from)),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("party {} hung up", from)),
        };
        received.with_context(|| format!("party {} receive", self.party))
    }
}

impl std::fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransport")
            .field("party", &self.party)
            .field("parties", &self.outbound.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_mesh_delivers_in_order() {
        let mut mesh = LocalTransport::mesh(2);
        let p1 = mesh.pop().unwrap();
        let p0 = mesh.pop().unwrap();

        let sender = thread::spawn(move || {
            p0.send(1, b"first").unwrap();
            p0.send(1, b"second").unwrap();
        });
        assert_eq!(p1.receive(0).unwrap(), b"first");
        assert_eq!(p1.receive(0).unwrap(), b"second");
        sender.join().unwrap();
    }

    #[test]
    fn test_receive_all_collects_each_party() {
        let mesh = LocalTransport::mesh(3);
        mesh[1].send(0, b"from-1").unwrap();
        mesh[2].send(0, b"from-2").unwrap();
        let all = mesh[0].receive_all(&[1, 2]).unwrap();
        assert_eq!(all, vec![b"from-1".to_vec(), b"from-2".to_vec()]);
    }

    #[test]
    fn test_timeout_and_unknown_party() {
        let mesh = LocalTransport::mesh_with_timeout(2, Duration::from_millis(10));
        let err = mesh[0].receive(1).unwrap_err();
        assert!(format!("{:#}", err).contains("timed out"));
        assert!(mesh[0].send(5, b"x").is_err());
    }
}
