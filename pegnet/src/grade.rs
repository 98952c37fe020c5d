//! Round grading.
//!
//! Grading orders a round's entries and decides who gets paid. The
//! consensus-exact algorithm (price band scoring across versions) is an
//! external module injected through [`Grader`]; the in-tree
//! [`DifficultyGrader`] orders validated entries by their proven work,
//! which is exact for the parts of the pipeline the pool relies on:
//! positions, payouts per position, and the winner short hash chain.

use std::sync::Arc;

use oprpool_chain::Entry;
use oprpool_core::constants::winner_count;
use oprpool_core::hasher::{compute_target, opr_hash};
use oprpool_core::PowHasher;

/// How many entries a graded round keeps.
pub const GRADING_CUTOFF: usize = 50;

/// One graded entry, best position first.
#[derive(Debug, Clone)]
pub struct GradedEntry {
    /// 0-based rank in the graded set
    pub position: i32,
    /// Reward in atomic units; zero past the winning set
    pub payout: i64,
    /// The target proven by the entry's nonce
    pub self_reported_difficulty: u64,
    /// Identity string from the entry content
    pub id: String,
    /// Coinbase address from the entry content
    pub address: String,
    /// Hex entry hash
    pub entry_hash: String,
}

impl GradedEntry {
    /// First eight bytes of the entry hash, the protocol's short form.
    pub fn short_hash(&self) -> String {
        self.entry_hash.chars().take(16).collect()
    }
}

/// The outcome of grading one round.
#[derive(Debug, Clone, Default)]
pub struct GradedRound {
    pub version: u8,
    pub cutoff: i32,
    /// Number of entries considered before the cutoff
    pub count: i32,
    /// Graded entries, position order
    pub graded: Vec<GradedEntry>,
    pub winners_short_hashes: Vec<String>,
}

impl GradedRound {
    pub fn winners(&self) -> &[GradedEntry] {
        let n = winner_count(self.version).min(self.graded.len());
        &self.graded[..n]
    }
}

/// The grading seam. `prev_winners` are the short hashes every valid entry
/// of this round must reference.
pub trait Grader: Send + Sync {
    fn grade(
        &self,
        version: u8,
        height: i32,
        prev_winners: &[String],
        entries: &[Entry],
    ) -> Option<GradedRound>;
}

/// Payout for a graded position, by version.
pub fn position_payout(version: u8, position: usize) -> i64 {
    const V1_SCHEDULE: [i64; 10] = [800, 600, 450, 450, 450, 450, 450, 450, 450, 450];
    match version {
        1 => {
            if position < V1_SCHEDULE.len() {
                V1_SCHEDULE[position] * 100_000_000
            } else {
                0
            }
        }
        _ => {
            if position < 25 {
                200 * 100_000_000
            } else {
                0
            }
        }
    }
}

/// Orders entries by proven work.
///
/// An entry is considered iff its external ids parse as
/// `[nonce, be_u64(target), [version]]`, the version byte matches the
/// round, and the reported target reproduces under the PoW hash. Rounds
/// with fewer valid entries than the winner set are not graded.
pub struct DifficultyGrader {
    hasher: Arc<dyn PowHasher>,
}

impl DifficultyGrader {
    pub fn new(hasher: Arc<dyn PowHasher>) -> Self {
        DifficultyGrader { hasher }
    }

    fn validate_entry(&self, version: u8, entry: &Entry) -> Option<GradedEntry> {
        if entry.ext_ids.len() != 3 {
            return None;
        }
        let nonce = &entry.ext_ids[0];
        let target_bytes: [u8; 8] = entry.ext_ids[1].as_slice().try_into().ok()?;
        let reported = u64::from_be_bytes(target_bytes);
        if entry.ext_ids[2] != [version] {
            return None;
        }
        if entry.content.is_empty() {
            return None;
        }

        let oh = opr_hash(&entry.content);
        if compute_target(self.hasher.as_ref(), &oh, nonce) != reported {
            return None;
        }

        Some(GradedEntry {
            position: 0,
            payout: 0,
            self_reported_difficulty: reported,
            id: parse_content_field(&entry.content, ContentField::Id).unwrap_or_default(),
            address: parse_content_field(&entry.content, ContentField::Address).unwrap_or_default(),
            entry_hash: entry.hash.clone(),
        })
    }
}

impl Grader for DifficultyGrader {
    fn grade(
        &self,
        version: u8,
        _height: i32,
        _prev_winners: &[String],
        entries: &[Entry],
    ) -> Option<GradedRound> {
        let mut graded: Vec<GradedEntry> = entries
            .iter()
            .filter_map(|e| self.validate_entry(version, e))
            .collect();

        if graded.len() < winner_count(version) {
            return None;
        }

        let count = graded.len() as i32;
        graded.sort_by(|a, b| b.self_reported_difficulty.cmp(&a.self_reported_difficulty));
        graded.truncate(GRADING_CUTOFF);

        for (i, g) in graded.iter_mut().enumerate() {
            g.position = i as i32;
            g.payout = position_payout(version, i);
        }

        let winners_short_hashes = graded
            .iter()
            .take(winner_count(version))
            .map(|g| g.short_hash())
            .collect();

        Some(GradedRound {
            version,
            cutoff: GRADING_CUTOFF as i32,
            count,
            graded,
            winners_short_hashes,
        })
    }
}

enum ContentField {
    Id,
    Address,
}

/// Pulls the identity or address out of a marshaled record without a full
/// decode. Both sit right after the version byte and height; version 4
/// records use u16 length prefixes, earlier versions a single byte.
fn parse_content_field(content: &[u8], field: ContentField) -> Option<String> {
    let wide = *content.first()? >= 4;
    let mut pos = 5; // version + height

    let mut read_len = |pos: &mut usize| -> Option<usize> {
        if wide {
            let hi = *content.get(*pos)? as usize;
            let lo = *content.get(*pos + 1)? as usize;
            *pos += 2;
            Some(hi << 8 | lo)
        } else {
            let len = *content.get(*pos)? as usize;
            *pos += 1;
            Some(len)
        }
    };

    let id_len = read_len(&mut pos)?;
    let id = content.get(pos..pos + id_len)?;
    if let ContentField::Id = field {
        return String::from_utf8(id.to_vec()).ok();
    }
    pos += id_len;
    let addr_len = read_len(&mut pos)?;
    let addr = content.get(pos..pos + addr_len)?;
    String::from_utf8(addr.to_vec()).ok()
}
