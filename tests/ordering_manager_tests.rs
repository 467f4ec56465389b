//! `OrderingManager` exercised as an external consumer would, simulating a
//! worker pool that completes requests in a scrambled order.

use sftp::server::OrderingManager;
use sftp::protocol::packet::Status;
use sftp::Packet;

fn ok(id: u32) -> Packet {
    Packet::Status(Status::ok(id))
}

#[tokio::test]
async fn five_requests_completed_in_reverse_order_still_emit_in_arrival_order() {
    let (manager, mut outbound) = OrderingManager::new();
    for id in 1..=5 {
        manager.register_arrival(id).await;
    }

    // Simulate five worker tasks racing to completion in reverse order.
    let workers: Vec<_> = (1..=5)
        .rev()
        .map(|id| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager.complete(id, ok(id)).await;
            })
        })
        .collect();
    for worker in workers {
        worker.await.unwrap();
    }

    for expected in 1..=5 {
        let packet = outbound.recv().await.unwrap();
        assert_eq!(packet.id(), Some(expected));
    }
}

#[tokio::test]
async fn close_unblocks_only_after_every_registered_arrival_drains() {
    let (manager, mut outbound) = OrderingManager::new();
    manager.register_arrival(1).await;
    manager.register_arrival(2).await;
    manager.register_arrival(3).await;

    let waiter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.close().await })
    };

    manager.complete(3, ok(3)).await;
    manager.complete(2, ok(2)).await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    assert!(!waiter.is_finished(), "id 1 is still outstanding");

    manager.complete(1, ok(1)).await;
    tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();

    for expected in 1..=3 {
        assert_eq!(outbound.recv().await.unwrap().id(), Some(expected));
    }
}
