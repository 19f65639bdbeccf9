//! Owner-to-ghost value propagation.

use itertools::izip;

use super::{CommPattern, LocalIndex, Rank, RegisteredArray, StalePolicy};
use crate::algs::communicator::Communicator;
use crate::algs::exchange::exchange_neighbors;
use crate::comm_error::PeCommError;
use crate::data::descriptor::TypedBufferDescriptor;

/// Pack one message per destination rank, ascending by rank.
#[cfg(feature = "rayon")]
fn pack_sends(
    descriptor: TypedBufferDescriptor,
    src: &[u8],
    send_map: &std::collections::BTreeMap<Rank, Vec<LocalIndex>>,
) -> Result<Vec<(Rank, Vec<u8>)>, PeCommError> {
    use rayon::prelude::*;
    let mut sends = send_map
        .par_iter()
        .map(|(&rank, slots)| pack_one(descriptor, src, rank, slots))
        .collect::<Result<Vec<_>, _>>()?;
    sends.sort_unstable_by_key(|(rank, _)| *rank);
    Ok(sends)
}

/// Pack one message per destination rank, ascending by rank.
#[cfg(not(feature = "rayon"))]
fn pack_sends(
    descriptor: TypedBufferDescriptor,
    src: &[u8],
    send_map: &std::collections::BTreeMap<Rank, Vec<LocalIndex>>,
) -> Result<Vec<(Rank, Vec<u8>)>, PeCommError> {
    send_map
        .iter()
        .map(|(&rank, slots)| pack_one(descriptor, src, rank, slots))
        .collect()
}

fn pack_one(
    descriptor: TypedBufferDescriptor,
    src: &[u8],
    rank: Rank,
    slots: &[LocalIndex],
) -> Result<(Rank, Vec<u8>), PeCommError> {
    let mut out = Vec::with_capacity(descriptor.transfer_bytes(slots.len()));
    descriptor.pack_indices(src, slots, &mut out)?;
    Ok((rank, out))
}

impl<C: Communicator> CommPattern<C> {
    /// Overwrite every ghost entry of every registered array with its owner's
    /// current value.
    ///
    /// Collective over the group. Arrays are processed in name order, one
    /// message per (array, neighbor) pair. Owned entries are never written,
    /// so calling this twice in a row is a no-op the second time.
    pub fn synchronize(&mut self) -> Result<(), PeCommError> {
        if !self.up_to_date {
            match self.config.on_stale {
                StalePolicy::Reject => return Err(PeCommError::PatternStale),
                StalePolicy::AutoRebuild => {
                    log::warn!(
                        "rank {}: assignment changed since last build; rebuilding before synchronize",
                        self.comm.rank()
                    );
                    self.build()?;
                }
            }
        }
        let local_size = self.local_size();
        for array in self.arrays.values() {
            array.check_len(local_size)?;
        }
        for array in self.arrays.values() {
            self.sync_array(array)?;
        }
        Ok(())
    }

    fn sync_array(&self, array: &RegisteredArray) -> Result<(), PeCommError> {
        let descriptor = array.descriptor;
        let sends = {
            let guard = array.storage.bytes();
            pack_sends(descriptor, &guard, &self.send_map)?
        };
        let recvs: Vec<(Rank, usize)> = self
            .recv_counts
            .iter()
            .map(|(&rank, &count)| (rank, descriptor.transfer_bytes(count)))
            .collect();
        let received = exchange_neighbors(&self.comm, self.tags.data, &sends, &recvs)?;

        let mut dst = array.storage.bytes_mut();
        let mut offset = 0;
        for ((owner, data), &count) in izip!(received, self.recv_counts.values()) {
            let slots = &self.recv_map[offset..offset + count];
            descriptor
                .unpack_indices(&mut dst, slots, &data)
                .map_err(|e| PeCommError::Transport {
                    neighbor: owner,
                    reason: e.to_string(),
                })?;
            offset += count;
        }
        log::trace!(
            "rank {}: synchronized `{}` ({} sent / {} ghost entries)",
            self.comm.rank(),
            array.name,
            self.send_map.values().map(Vec::len).sum::<usize>(),
            offset
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::data::storage::shared;
    use crate::pattern::PatternConfig;

    #[test]
    fn serial_synchronize_leaves_values_alone() {
        let mut p =
            CommPattern::with_assignment(NoComm, PatternConfig::default(), &[1, 2, 3], &[0, 0, 0])
                .unwrap();
        let a = shared(vec![1.5f32, 2.5, 3.5]);
        p.add_array("a", TypedBufferDescriptor::scalar::<f32>(), a.clone())
            .unwrap();
        p.build().unwrap();
        p.synchronize().unwrap();
        assert_eq!(*a.read(), vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn auto_rebuild_recovers_from_stale() {
        let mut p = CommPattern::with_assignment(NoComm, PatternConfig::auto_rebuild(), &[4], &[0])
            .unwrap();
        assert!(!p.is_up_to_date());
        p.synchronize().unwrap();
        assert!(p.is_up_to_date());
    }

    #[test]
    fn pack_follows_send_map_order() {
        let src: Vec<u16> = vec![10, 11, 12, 13];
        let mut map = std::collections::BTreeMap::new();
        map.insert(2, vec![3, 0]);
        map.insert(1, vec![1]);
        let sends = pack_sends(
            TypedBufferDescriptor::scalar::<u16>(),
            bytemuck::cast_slice(&src),
            &map,
        )
        .unwrap();
        let ranks: Vec<Rank> = sends.iter().map(|(r, _)| *r).collect();
        assert_eq!(ranks, vec![1, 2]);
        let d = TypedBufferDescriptor::scalar::<u16>();
        assert_eq!(d.decode::<u16>(&sends[1].1).unwrap(), vec![13, 10]);
    }
}
