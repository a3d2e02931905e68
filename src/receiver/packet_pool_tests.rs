use super::packet_pool::PacketPool;

#[test]
fn release_then_acquire_reuses_the_same_packet() {
    let mut pool = PacketPool::new();

    let packet = pool.acquire();
    let id = packet.id();
    pool.release(packet);

    let again = pool.acquire();
    assert_eq!(again.id(), id);
    assert_eq!(pool.free_len(), 0);
}

#[test]
fn acquire_reuses_lifo() {
    let mut pool = PacketPool::new();

    let a = pool.acquire();
    let b = pool.acquire();
    let (a_id, b_id) = (a.id(), b.id());
    assert_ne!(a_id, b_id);

    pool.release(a);
    pool.release(b);

    // Most recently released comes back first
    assert_eq!(pool.acquire().id(), b_id);
    assert_eq!(pool.acquire().id(), a_id);
}

#[test]
fn released_packet_payload_is_cleared() {
    let mut pool = PacketPool::new();

    let mut packet = pool.acquire();
    packet.fill(7, b"audio");
    pool.release(packet);

    let again = pool.acquire();
    assert!(again.payload().is_empty());
    assert_eq!(again.seq(), 0);
}

#[test]
fn retained_lookup_by_sequence() {
    let mut pool = PacketPool::new();

    for seq in [10u16, 11, 12] {
        let mut packet = pool.acquire();
        packet.fill(seq, &seq.to_be_bytes());
        pool.retain(packet);
    }

    assert_eq!(pool.retained_len(), 3);
    assert_eq!(pool.find_retained(11).unwrap().payload(), &11u16.to_be_bytes());
    assert!(pool.find_retained(99).is_none());

    let taken = pool.take_retained(11).unwrap();
    assert_eq!(taken.seq(), 11);
    assert_eq!(pool.retained_len(), 2);
    assert!(pool.find_retained(11).is_none());
}

#[test]
fn release_retained_recycles_everything() {
    let mut pool = PacketPool::new();

    for seq in 0u16..5 {
        let mut packet = pool.acquire();
        packet.fill(seq, b"x");
        pool.retain(packet);
    }

    pool.release_retained();
    assert_eq!(pool.retained_len(), 0);
    assert_eq!(pool.free_len(), 5);
}
