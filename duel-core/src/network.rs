use crate::{DuelResult, LeaderAddress};

/// Builds outbound channels to a leader address.
///
/// Construction must not require a round trip: reachability is confirmed
/// lazily by the first call made through the channel. Channels are cheap
/// handles; clones share the same underlying connection.
pub trait Connector: Send + Sync + 'static {
    type Channel: Clone + Send + Sync + 'static;

    fn connect(&self, address: &LeaderAddress) -> DuelResult<Self::Channel>;
}
