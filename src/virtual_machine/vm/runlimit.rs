use crate::virtual_machine::errors::VMError;

/// Runlimit granted to a run when the caller does not choose one.
pub const DEFAULT_RUNLIMIT: u64 = 1_000_000;

/// Cost per byte of data pushed or produced.
pub const DATA_BYTE_COST: u64 = 1;
/// Cost per byte fed to a hash function.
pub const HASH_BYTE_COST: u64 = 1;
/// Cost of one signature verification attempt.
pub const SIGNATURE_COST: u64 = 1024;
/// Cost of creating one entry (its id is hashed once on creation).
pub const ENTRY_COST: u64 = 32;
/// Base cost of a literal (small integer or push-data) instruction.
pub const LITERAL_COST: u64 = 1;

/// Number of cost categories tracked by [`RunlimitProfile`].
const COST_CATEGORY_COUNT: usize = 5;

/// Categories of runlimit consumption for profiling and debugging.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum CostCategory {
    /// Base cost for executing opcodes.
    Opcode = 0,
    /// Bytes pushed, concatenated, encoded or annotated.
    Data = 1,
    /// Bytes hashed by `sha256`, `sha3` and `vmhash`.
    Hashing = 2,
    /// Signature verification attempts.
    Signature = 3,
    /// Entries created.
    Entry = 4,
}

impl CostCategory {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CostCategory::Opcode => "Opcode",
            CostCategory::Data => "Data",
            CostCategory::Hashing => "Hashing",
            CostCategory::Signature => "Signature",
            CostCategory::Entry => "Entry",
        }
    }

    /// All categories in discriminant order.
    const ALL: [CostCategory; COST_CATEGORY_COUNT] = [
        CostCategory::Opcode,
        CostCategory::Data,
        CostCategory::Hashing,
        CostCategory::Signature,
        CostCategory::Entry,
    ];
}

/// Runlimit consumption profile.
///
/// Backed by a flat array indexed by [`CostCategory`] discriminant for
/// branch-free accumulation on the hot path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunlimitProfile {
    counts: [u64; COST_CATEGORY_COUNT],
}

impl RunlimitProfile {
    /// Creates a new empty profile.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds cost to the specified category.
    #[inline(always)]
    pub fn add(&mut self, category: CostCategory, amount: u64) {
        let slot = &mut self.counts[category as usize];
        *slot = slot.saturating_add(amount);
    }

    /// Cost recorded for one category.
    pub fn get(&self, category: CostCategory) -> u64 {
        self.counts[category as usize]
    }

    /// Returns the total cost across all categories.
    pub fn total(&self) -> u64 {
        self.counts
            .iter()
            .fold(0u64, |acc, &v| acc.saturating_add(v))
    }

    /// Returns an iterator over all categories and their costs.
    pub fn iter(&self) -> impl Iterator<Item = (CostCategory, u64)> {
        CostCategory::ALL.into_iter().zip(self.counts)
    }
}

/// Budget meter for one run.
#[derive(Clone, Debug)]
pub struct Runlimit {
    limit: u64,
    used: u64,
    profile: RunlimitProfile,
}

impl Runlimit {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: 0,
            profile: RunlimitProfile::new(),
        }
    }

    /// Charges `amount` to `category`.
    ///
    /// Returns [`VMError::ResourceLimitExceeded`] once the total passes the
    /// limit. The failing charge is still recorded.
    pub fn charge(&mut self, category: CostCategory, amount: u64) -> Result<(), VMError> {
        self.used = self.used.saturating_add(amount);
        self.profile.add(category, amount);
        if self.used > self.limit {
            return Err(VMError::ResourceLimitExceeded {
                resource: "runlimit",
                used: self.used,
                limit: self.limit,
            });
        }
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn profile(&self) -> &RunlimitProfile {
        &self.profile
    }
}
