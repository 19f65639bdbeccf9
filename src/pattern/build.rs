//! Collective construction of the routing maps.
//!
//! Every rank runs the same sequence of exchanges, whether or not it found a
//! conflict, rejected its input or lost an exchange, so a local failure never
//! leaves a peer blocked in a receive:
//!
//! 1. claims:  each held gid is reported to its directory rank `gid % size`
//! 2. counts:  how many ghost entries each rank needs from each owner
//! 3. ids:     the requested gid lists, in the requester's slot order
//! 4. verdict: every rank shares its smallest conflict and whether it aborted

use std::collections::BTreeMap;
use std::mem::size_of;

use hashbrown::HashMap;

use super::{CommPattern, GlobalId, LocalIndex, Rank};
use crate::algs::communicator::Communicator;
use crate::algs::exchange::{exchange_all, exchange_counts, exchange_neighbors};
use crate::algs::wire::{
    WIRE_VERSION, WireClaim, WireConflictHdr, WireGid, WireRank, cast_slice, decode_records,
};
use crate::comm_error::PeCommError;

/// What one rank found during a build, shared with the group at the end.
#[derive(Debug, Default)]
struct Verdict {
    /// Smallest-gid ownership conflict seen so far.
    conflict: Option<(GlobalId, Vec<Rank>)>,
    /// This rank could not complete its part (rejected input, failed exchange).
    aborted: bool,
}

impl Verdict {
    fn record(&mut self, gid: GlobalId, ranks: Vec<Rank>) {
        match &mut self.conflict {
            Some((g, _)) if *g < gid => {}
            Some((g, known)) if *g == gid => known.extend(ranks),
            _ => self.conflict = Some((gid, ranks)),
        }
        if let Some((_, known)) = &mut self.conflict {
            known.sort_unstable();
            known.dedup();
        }
    }

    fn abort(&mut self, me: Rank, reason: &PeCommError) {
        log::error!("rank {me}: cannot take part in build: {reason}");
        self.aborted = true;
    }

    fn encode(&self) -> Result<Vec<u8>, String> {
        let (hdr, ranks) = match &self.conflict {
            None => (WireConflictHdr::none(), Vec::new()),
            Some((gid, ranks)) => (
                WireConflictHdr::new(*gid, ranks.len())?,
                ranks
                    .iter()
                    .map(|&r| WireRank::of(r))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        };
        let hdr = if self.aborted { hdr.aborted() } else { hdr };
        let mut out = cast_slice(&[hdr]).to_vec();
        out.extend_from_slice(cast_slice(&ranks));
        Ok(out)
    }

    fn decode(raw: &[u8]) -> Result<Self, String> {
        let hdr_len = size_of::<WireConflictHdr>();
        if raw.len() < hdr_len {
            return Err(format!("verdict of {} bytes is shorter than its header", raw.len()));
        }
        let hdr = decode_records::<WireConflictHdr>(&raw[..hdr_len])?.remove(0);
        if hdr.version() != WIRE_VERSION {
            return Err(format!(
                "verdict wire version {} (expected {WIRE_VERSION})",
                hdr.version()
            ));
        }
        let aborted = hdr.sender_aborted();
        if !hdr.present() {
            return Ok(Self {
                conflict: None,
                aborted,
            });
        }
        let ranks: Vec<Rank> = decode_records::<WireRank>(&raw[hdr_len..])?
            .iter()
            .map(WireRank::get)
            .collect();
        if ranks.len() != hdr.n_ranks() {
            return Err(format!(
                "verdict announces {} ranks but carries {}",
                hdr.n_ranks(),
                ranks.len()
            ));
        }
        Ok(Self {
            conflict: Some((hdr.gid(), ranks)),
            aborted,
        })
    }
}

impl<C: Communicator> CommPattern<C> {
    /// Derive the routing maps from the current assignment.
    ///
    /// Collective: every rank of the group must call it. On success the
    /// pattern is up to date. Otherwise every rank returns the same error and
    /// stays stale with empty routing:
    /// - [`PeCommError::BuildAborted`] if some rank could not take part;
    /// - [`PeCommError::OwnershipConflict`] if a gid has zero or several
    ///   owners, or an owner outside the group.
    ///
    /// Only a failure of the final verdict exchange itself is seen by some
    /// ranks and not others. A build aborted by a transport failure may leave
    /// undelivered messages on this pattern's tags.
    pub fn build(&mut self) -> Result<(), PeCommError> {
        self.build_collective(None)
    }

    /// Replace the assignment and rebuild in one collective call.
    ///
    /// Unlike [`set_assignment`](Self::set_assignment) the input is judged by
    /// the whole group: owners outside the group surface as an
    /// `OwnershipConflict`, and an `ids`/`owners` length mismatch keeps the
    /// previous assignment and aborts the build on every rank.
    pub fn build_from(&mut self, ids: &[GlobalId], owners: &[Rank]) -> Result<(), PeCommError> {
        if ids.len() != owners.len() {
            return self.abort_build(PeCommError::LengthMismatch {
                ids: ids.len(),
                owners: owners.len(),
            });
        }
        self.ids = ids.to_vec();
        self.owners = owners.to_vec();
        self.build()
    }

    /// Take part in a build with no assignment of our own, so that peers
    /// complete; every rank then returns `BuildAborted`.
    pub(crate) fn abort_build(&mut self, reason: PeCommError) -> Result<(), PeCommError> {
        self.build_collective(Some(reason))
    }

    fn build_collective(&mut self, rejected: Option<PeCommError>) -> Result<(), PeCommError> {
        let me = self.comm.rank();
        let n = self.comm.size();
        self.clear_routing();

        let mut verdict = Verdict::default();
        let (ids, owners): (&[GlobalId], &[Rank]) = match &rejected {
            Some(reason) => {
                verdict.abort(me, reason);
                (&[][..], &[][..])
            }
            None => (self.ids.as_slice(), self.owners.as_slice()),
        };
        let updatable: Vec<bool> = owners.iter().map(|&o| o == me).collect();

        // ghost slots grouped by owner, ascending local index
        let mut demand: BTreeMap<Rank, Vec<LocalIndex>> = BTreeMap::new();
        // a gid repeated locally must name one owner
        let mut local_owner: HashMap<GlobalId, Rank> = HashMap::with_capacity(ids.len());
        let mut claims: BTreeMap<GlobalId, bool> = BTreeMap::new();
        for (i, (&gid, &owner)) in ids.iter().zip(owners).enumerate() {
            *claims.entry(gid).or_default() |= owner == me;
            if owner >= n {
                verdict.record(gid, vec![me]);
                continue;
            }
            let first = *local_owner.entry(gid).or_insert(owner);
            if first != owner {
                verdict.record(gid, vec![first, owner]);
            }
            if owner != me {
                demand.entry(owner).or_default().push(i);
            }
        }

        if let Err(e) = self.check_claims(&claims, &mut verdict) {
            verdict.abort(me, &e);
        }

        let demand_counts: Vec<usize> = (0..n)
            .map(|r| demand.get(&r).map_or(0, Vec::len))
            .collect();
        let supply_counts = exchange_counts(&self.comm, self.tags.counts, &demand_counts)
            .unwrap_or_else(|e| {
                verdict.abort(me, &e);
                vec![0; n]
            });

        let sends: Vec<(Rank, Vec<u8>)> = demand
            .iter()
            .map(|(&owner, slots)| {
                let gids: Vec<WireGid> = slots.iter().map(|&i| WireGid::of(ids[i])).collect();
                (owner, cast_slice(&gids).to_vec())
            })
            .collect();
        let recvs: Vec<(Rank, usize)> = supply_counts
            .iter()
            .enumerate()
            .filter(|&(r, &c)| r != me && c > 0)
            .map(|(r, &c)| (r, c * size_of::<WireGid>()))
            .collect();
        let requests = exchange_neighbors(&self.comm, self.tags.ids, &sends, &recvs)
            .unwrap_or_else(|e| {
                verdict.abort(me, &e);
                Vec::new()
            });

        // first owned slot of each gid
        let mut owned_slot: HashMap<GlobalId, LocalIndex> = HashMap::new();
        for (i, (&gid, &mine)) in ids.iter().zip(&updatable).enumerate() {
            if mine {
                owned_slot.entry(gid).or_insert(i);
            }
        }
        let mut send_map: BTreeMap<Rank, Vec<LocalIndex>> = BTreeMap::new();
        for (requester, raw) in requests {
            let gids = match decode_records::<WireGid>(&raw) {
                Ok(gids) => gids,
                Err(reason) => {
                    verdict.abort(
                        me,
                        &PeCommError::Transport {
                            neighbor: requester,
                            reason,
                        },
                    );
                    continue;
                }
            };
            let mut slots = Vec::with_capacity(gids.len());
            for gid in gids.iter().map(WireGid::get) {
                match owned_slot.get(&gid) {
                    Some(&i) => slots.push(i),
                    None => verdict.record(gid, vec![me, requester]),
                }
            }
            send_map.insert(requester, slots);
        }

        self.agree(verdict)?;

        self.recv_counts = demand.iter().map(|(&r, slots)| (r, slots.len())).collect();
        self.recv_map = demand.into_values().flatten().collect();
        self.send_map = send_map;
        self.updatable = updatable;
        self.up_to_date = true;

        log::debug!(
            "rank {me}: pattern built, {} local / {} ghost entries, sending to {} ranks, receiving from {}",
            self.local_size(),
            self.recv_map.len(),
            self.send_map.len(),
            self.recv_counts.len()
        );
        #[cfg(debug_assertions)]
        self.validate_routing()?;
        Ok(())
    }

    /// Report every held gid to its directory rank, then tally the reports we
    /// are directory for: each gid needs exactly one owning claimant.
    fn check_claims(
        &self,
        claims: &BTreeMap<GlobalId, bool>,
        verdict: &mut Verdict,
    ) -> Result<(), PeCommError> {
        let n = self.comm.size();
        let mut outgoing: Vec<Vec<WireClaim>> = vec![Vec::new(); n];
        for (&gid, &owned) in claims {
            outgoing[(gid % n as u64) as usize].push(WireClaim::new(gid, owned));
        }
        let outgoing = outgoing.iter().map(|c| cast_slice(c).to_vec()).collect();
        let incoming = exchange_all(&self.comm, self.tags.claims, outgoing)?;

        // gid -> (holders, claimants)
        let mut tally: BTreeMap<GlobalId, (Vec<Rank>, Vec<Rank>)> = BTreeMap::new();
        for (src, raw) in incoming.iter().enumerate() {
            let records = decode_records::<WireClaim>(raw).map_err(|reason| {
                PeCommError::Transport {
                    neighbor: src,
                    reason,
                }
            })?;
            for claim in records {
                let (holders, claimants) = tally.entry(claim.gid()).or_default();
                holders.push(src);
                if claim.owned() {
                    claimants.push(src);
                }
            }
        }
        for (gid, (holders, claimants)) in tally {
            match claimants.len() {
                1 => {}
                0 => verdict.record(gid, holders),
                _ => verdict.record(gid, claimants),
            }
        }
        Ok(())
    }

    /// Share local verdicts with every rank. Any aborted rank fails the whole
    /// build; otherwise all ranks settle on the conflict with the smallest
    /// gid, merging the ranks reported for it.
    fn agree(&self, verdict: Verdict) -> Result<(), PeCommError> {
        let me = self.comm.rank();
        let frame = verdict.encode().unwrap_or_else(|reason| {
            log::error!("rank {me}: cannot encode build verdict: {reason}");
            cast_slice(&[WireConflictHdr::none().aborted()]).to_vec()
        });
        let incoming = exchange_all(&self.comm, self.tags.verdict, vec![frame; self.comm.size()])?;
        let mut group = Verdict::default();
        let mut aborted = Vec::new();
        for (src, raw) in incoming.iter().enumerate() {
            let reported = Verdict::decode(raw).map_err(|reason| PeCommError::Transport {
                neighbor: src,
                reason,
            })?;
            if reported.aborted {
                aborted.push(src);
            }
            if let Some((gid, ranks)) = reported.conflict {
                group.record(gid, ranks);
            }
        }
        if !aborted.is_empty() {
            log::error!("rank {me}: build aborted, ranks {aborted:?} could not take part");
            return Err(PeCommError::BuildAborted { ranks: aborted });
        }
        match group.conflict {
            Some((gid, ranks)) => {
                log::error!("rank {me}: global id {gid} has conflicting owners on ranks {ranks:?}");
                Err(PeCommError::OwnershipConflict { gid, ranks })
            }
            None => Ok(()),
        }
    }
}
