//! Pooled packet buffers for in-flight audio data
//!
//! Reception runs at ~125 packets per second; recycling buffers keeps
//! the steady state allocation-free. A packet is either on the free list
//! (owned by the pool, payload cleared) or retained (holding one
//! in-flight sequence's payload while the reorder engine decides its
//! fate). The retained set is bounded by the reorder window, so the
//! linear lookup by sequence number stays cheap.

use bytes::BytesMut;

/// One pooled packet: a payload buffer plus sequence metadata
#[derive(Debug)]
pub struct Packet {
    id: u64,
    seq: u16,
    payload: BytesMut,
}

impl Packet {
    fn new(id: u64) -> Self {
        Self {
            id,
            seq: 0,
            payload: BytesMut::new(),
        }
    }

    /// Pool-assigned identity, stable across reuse
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Sequence number this packet currently carries
    #[must_use]
    pub fn seq(&self) -> u16 {
        self.seq
    }

    /// Payload bytes
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Load a sequence's payload into this packet, reusing the buffer
    pub fn fill(&mut self, seq: u16, data: &[u8]) {
        self.seq = seq;
        self.payload.clear();
        self.payload.extend_from_slice(data);
    }

    fn clear(&mut self) {
        self.seq = 0;
        self.payload.clear();
    }
}

/// Recycling pool of packets, tracking free and retained sets
#[derive(Debug, Default)]
pub struct PacketPool {
    free: Vec<Packet>,
    retained: Vec<Packet>,
    next_id: u64,
}

impl PacketPool {
    /// Create an empty pool; packets are allocated lazily on demand
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a packet: the most recently released one, or a fresh
    /// allocation when the free list is empty. Never fails.
    pub fn acquire(&mut self) -> Packet {
        self.free.pop().unwrap_or_else(|| {
            self.next_id += 1;
            Packet::new(self.next_id)
        })
    }

    /// Move a filled packet into the retained set
    pub fn retain(&mut self, packet: Packet) {
        self.retained.push(packet);
    }

    /// Look up a retained packet by sequence number
    #[must_use]
    pub fn find_retained(&self, seq: u16) -> Option<&Packet> {
        self.retained.iter().find(|p| p.seq == seq)
    }

    /// Remove and return a retained packet by sequence number
    pub fn take_retained(&mut self, seq: u16) -> Option<Packet> {
        let idx = self.retained.iter().position(|p| p.seq == seq)?;
        Some(self.retained.swap_remove(idx))
    }

    /// Return a packet to the free list, clearing its payload
    pub fn release(&mut self, mut packet: Packet) {
        packet.clear();
        self.free.push(packet);
    }

    /// Release every retained packet (session reset)
    pub fn release_retained(&mut self) {
        while let Some(packet) = self.retained.pop() {
            self.release(packet);
        }
    }

    /// Number of packets on the free list
    #[must_use]
    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Number of retained packets
    #[must_use]
    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }
}
