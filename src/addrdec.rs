use crate::address;

/// Number of address bits needed to index `n` items.
///
/// Non-power-of-two counts round down, so part of the configured
/// capacity becomes unaddressable. They never corrupt the mapping.
#[must_use]
pub fn lg2(n: usize) -> u32 {
    n.max(1).ilog2()
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("prefetch size must be nonzero")]
    ZeroPrefetchSize,
    #[error("transfer size of {transfer} bytes is not a multiple of the {block} byte block size")]
    UnalignedTransfer { transfer: usize, block: usize },
    #[error("geometry count for {0} must be nonzero")]
    ZeroCount(&'static str),
}

/// One contiguous bit field of the physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slice {
    shift: u32,
    bits: u32,
}

impl Slice {
    fn of(&self, addr: address) -> u64 {
        if self.bits == 0 {
            return 0;
        }
        (addr >> self.shift) & ((1 << self.bits) - 1)
    }
}

/// Slices a physical address into (offset, column, bank, rank, channel, row).
///
/// The layout from the least significant bit upward is
/// `[offset | column | bank | rank | channel | row]`, each field wide
/// enough to index the configured count (column width uses columns per
/// transfer, offset width covers one full bus transfer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDecoder {
    offset: Slice,
    column: Slice,
    bank: Slice,
    rank: Slice,
    channel: Slice,
    row: Slice,
}

impl AddressDecoder {
    pub fn new(
        channel_width: usize,
        prefetch_size: usize,
        block_size: usize,
        channels: usize,
        banks: usize,
        columns: usize,
        ranks: usize,
        rows: usize,
    ) -> Result<Self, Error> {
        if prefetch_size == 0 {
            return Err(Error::ZeroPrefetchSize);
        }
        let transfer = channel_width * prefetch_size;
        if block_size == 0 || transfer % block_size != 0 {
            return Err(Error::UnalignedTransfer {
                transfer,
                block: block_size,
            });
        }
        for (name, count) in [
            ("channels", channels),
            ("banks", banks),
            ("columns", columns),
            ("ranks", ranks),
            ("rows", rows),
        ] {
            if count == 0 {
                return Err(Error::ZeroCount(name));
            }
        }

        let mut shift = 0;
        let mut slice = |count: usize| {
            let bits = lg2(count);
            let slice = Slice { shift, bits };
            shift += bits;
            slice
        };
        Ok(Self {
            offset: slice(transfer),
            column: slice(columns / prefetch_size),
            bank: slice(banks),
            rank: slice(ranks),
            channel: slice(channels),
            row: slice(rows),
        })
    }

    #[must_use]
    pub fn get_channel(&self, addr: address) -> u64 {
        self.channel.of(addr)
    }

    #[must_use]
    pub fn get_rank(&self, addr: address) -> u64 {
        self.rank.of(addr)
    }

    #[must_use]
    pub fn get_bank(&self, addr: address) -> u64 {
        self.bank.of(addr)
    }

    #[must_use]
    pub fn get_row(&self, addr: address) -> u64 {
        self.row.of(addr)
    }

    #[must_use]
    pub fn get_column(&self, addr: address) -> u64 {
        self.column.of(addr)
    }

    #[must_use]
    pub fn get_offset(&self, addr: address) -> u64 {
        self.offset.of(addr)
    }

    /// Two addresses collide when they agree on every field but the offset.
    #[must_use]
    pub fn same_block(&self, a: address, b: address) -> bool {
        a - self.get_offset(a) == b - self.get_offset(b)
    }

    /// Total number of bits the decoder interprets.
    #[must_use]
    pub fn bit_size(&self) -> u32 {
        self.row.shift + self.row.bits
    }

    /// Total addressable bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        1 << self.bit_size()
    }

    #[must_use]
    pub fn channels(&self) -> usize {
        1 << self.channel.bits
    }

    #[must_use]
    pub fn ranks(&self) -> usize {
        1 << self.rank.bits
    }

    #[must_use]
    pub fn banks(&self) -> usize {
        1 << self.bank.bits
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        1 << self.row.bits
    }

    #[must_use]
    pub fn columns(&self) -> usize {
        1 << self.column.bits
    }
}
