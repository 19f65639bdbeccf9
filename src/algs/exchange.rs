//! Collective byte exchanges built on the point-to-point [`Communicator`].
//!
//! Every helper posts all receives first, then all sends, and guarantees that
//! every send/receive handle is drained before returning, even if an error
//! occurs. Results are always ordered by ascending peer rank.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, decode_records, expect_exact_len};
use crate::comm_error::PeCommError;

/// Wait on every receive, keeping the first failure but never returning early.
fn drain_receives<H: Wait>(
    pending: Vec<(usize, Option<usize>, H)>,
) -> Result<Vec<(usize, Vec<u8>)>, PeCommError> {
    let mut out = Vec::with_capacity(pending.len());
    let mut maybe_err = None;
    for (nbr, expected, h) in pending {
        match h.wait() {
            Some(data) => {
                let checked = expected.map_or(Ok(()), |n| expect_exact_len(data.len(), n));
                match checked {
                    Ok(()) if maybe_err.is_none() => out.push((nbr, data)),
                    Err(reason) if maybe_err.is_none() => {
                        maybe_err = Some(PeCommError::Transport {
                            neighbor: nbr,
                            reason,
                        });
                    }
                    _ => {} // already have an error; just drain
                }
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(PeCommError::Transport {
                    neighbor: nbr,
                    reason: format!("failed to receive from rank {nbr}"),
                });
            }
            None => {}
        }
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

/// Exchange messages with an explicit set of neighbors.
///
/// `sends` are `(rank, bytes)`; `recvs` are `(rank, expected byte length)`.
/// Returns the received messages in the order of `recvs`.
pub fn exchange_neighbors<C: Communicator>(
    comm: &C,
    tag: CommTag,
    sends: &[(usize, Vec<u8>)],
    recvs: &[(usize, usize)],
) -> Result<Vec<(usize, Vec<u8>)>, PeCommError> {
    // 1) post all receives
    let pending: Vec<_> = recvs
        .iter()
        .map(|&(nbr, len)| (nbr, Some(len), comm.irecv(nbr, tag.as_u16())))
        .collect();

    // 2) post all sends; `sends` keeps the buffers alive until completion
    let pending_sends: Vec<_> = sends
        .iter()
        .map(|(nbr, buf)| comm.isend(*nbr, tag.as_u16(), buf))
        .collect();

    // 3) wait for all recvs
    let received = drain_receives(pending);

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }
    log::trace!(
        "rank {}: tag {:#06x} exchanged {} sends / {} receives",
        comm.rank(),
        tag.as_u16(),
        sends.len(),
        recvs.len()
    );
    received
}

/// All-to-all exchange of variable-length messages; `outgoing[r]` goes to rank `r`.
///
/// Receive sizes need not be known in advance. The entry for the calling rank
/// is moved across locally without touching the transport.
pub fn exchange_all<C: Communicator>(
    comm: &C,
    tag: CommTag,
    mut outgoing: Vec<Vec<u8>>,
) -> Result<Vec<Vec<u8>>, PeCommError> {
    let me = comm.rank();
    let n = comm.size();
    if outgoing.len() != n {
        return Err(PeCommError::Transport {
            neighbor: me,
            reason: format!("{} outgoing messages for a group of {n}", outgoing.len()),
        });
    }

    let pending: Vec<_> = (0..n)
        .filter(|&r| r != me)
        .map(|r| (r, None, comm.irecv(r, tag.as_u16())))
        .collect();
    let pending_sends: Vec<_> = (0..n)
        .filter(|&r| r != me)
        .map(|r| comm.isend(r, tag.as_u16(), &outgoing[r]))
        .collect();

    let received = drain_receives(pending);
    for send in pending_sends {
        let _ = send.wait();
    }

    let mut incoming = vec![Vec::new(); n];
    incoming[me] = std::mem::take(&mut outgoing[me]);
    for (r, data) in received? {
        incoming[r] = data;
    }
    Ok(incoming)
}

/// All-to-all exchange of one count per rank: `counts[r]` is sent to rank `r`,
/// and slot `r` of the result holds what rank `r` sent to us.
///
/// A count too large for the wire still takes part in the exchange as an
/// empty message (the peer sees a transport error), and the local encoding
/// error is returned once every handle has drained.
pub fn exchange_counts<C: Communicator>(
    comm: &C,
    tag: CommTag,
    counts: &[usize],
) -> Result<Vec<usize>, PeCommError> {
    let mut encode_err = None;
    let outgoing = counts
        .iter()
        .enumerate()
        .map(|(r, &c)| match WireCount::new(c) {
            Ok(wc) => cast_slice(std::slice::from_ref(&wc)).to_vec(),
            Err(reason) => {
                if encode_err.is_none() {
                    encode_err = Some(PeCommError::Transport {
                        neighbor: r,
                        reason,
                    });
                }
                Vec::new()
            }
        })
        .collect();
    let incoming = exchange_all(comm, tag, outgoing);
    if let Some(err) = encode_err {
        return Err(err);
    }
    incoming?
        .into_iter()
        .enumerate()
        .map(|(r, raw)| {
            let cnt = decode_records::<WireCount>(&raw)
                .and_then(|v| match v.as_slice() {
                    [c] => Ok(c.get()),
                    _ => Err(format!("expected one count, got {} bytes", raw.len())),
                })
                .map_err(|reason| PeCommError::Transport {
                    neighbor: r,
                    reason,
                })?;
            Ok(cnt)
        })
        .collect()
}
