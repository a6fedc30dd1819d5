use tracing::debug;

use crate::constants::TAG_MERGE_BASE;
use crate::index::{self, IndexRec};
use crate::sort;
use crate::transport::{Transport, TransportError};

/// Number of IndexRecs held by the size-2^round subtree that `rank`
/// belongs to. Computable by both parties of a round, which is what
/// makes the tree run without size handshakes. Subtree members outside
/// [0, size) contribute nothing; they never existed to begin with.
pub fn subtree_size(n: u64, size: usize, rank: usize, round: u32) -> usize {
    let group = 1usize << round;
    let base = (rank / group) * group;
    (base..base + group)
        .filter(|&r| r < size)
        .map(|r| index::count_for_rank(n, size, r))
        .sum()
}

/// Pairwise tournament over sorted slices: in round r the partner is
/// rank XOR 2^r. Receivers absorb their partner's slice and stay in;
/// senders ship theirs and go terminally inactive. Ranks whose partner
/// falls outside the world skip the round. After the last round rank 0
/// holds the full sorted index; every other rank ends empty.
pub fn pairwise_merge<T: Transport>(
    mut local: Vec<IndexRec>,
    n: u64,
    transport: &T,
) -> Result<Vec<IndexRec>, TransportError> {
    let rank = transport.rank();
    let size = transport.size();

    let mut round = 0u32;
    while (1usize << round) < size {
        let partner = rank ^ (1usize << round);
        if partner < size {
            let block = 1usize << (round + 1);
            let tag = TAG_MERGE_BASE + round;
            if rank % block == 0 && rank < partner {
                let expected = subtree_size(n, size, partner, round);
                let partner_recs = transport.recv(partner, tag, expected)?;
                debug!(round, partner, received = partner_recs.len(), "merge round");
                let mine_n = local.len();
                local.extend_from_slice(&partner_recs);
                sort::merge_adjacent(&mut local, mine_n);
                debug_assert!(local.windows(2).all(|w| w[0].key <= w[1].key));
            } else {
                debug!(round, partner, sent = local.len(), "handing off slice");
                transport.send(partner, tag, &local)?;
                local = Vec::new();
                break;
            }
        }
        round += 1;
    }
    Ok(local)
}
