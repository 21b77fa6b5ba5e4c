//! Router against a component answering requests on its own task.

use std::time::Duration;
use tokio::sync::mpsc;
use tributary_core::{Record, Request};
use tributary_flow::{MessageRouter, RouterConfig};

fn config() -> RouterConfig {
    RouterConfig {
        poll_interval: Duration::from_millis(20),
    }
}

/// Answers every request carrying a mailbox slot with a status report.
fn spawn_component(
    mut requests: mpsc::UnboundedReceiver<Record>,
    responses: mpsc::UnboundedSender<Record>,
) -> tokio::task::JoinHandle<usize> {
    tokio::spawn(async move {
        let mut served = 0;
        let mut offset = 0;
        while let Some(request) = requests.recv().await {
            offset += 100;
            let Some(slot) = request.control.mailbox_slot.clone() else {
                continue;
            };
            let mut reply = Record::status_report(offset);
            reply.control.mailbox_slot = Some(slot);
            if responses.send(reply).is_err() {
                break;
            }
            served += 1;
        }
        served
    })
}

#[tokio::test]
async fn test_idle_polls_do_not_stop_the_loop() {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    let (router, task) = MessageRouter::new(config(), req_tx, resp_rx);
    let handle = task.spawn();
    let component = spawn_component(req_rx, resp_tx);

    // Several poll intervals with nothing to read
    tokio::time::sleep(Duration::from_millis(100)).await;

    let reply = router
        .send_and_receive(Record::sender_mark())
        .unwrap()
        .get(Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.request(), Some(&Request::StatusReport { sent_offset: 100 }));

    let stats = handle.stop().await.unwrap();
    assert!(stats.poll_timeouts >= 2);
    assert_eq!(stats.matched, 1);

    drop(router);
    assert_eq!(component.await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_callers_get_their_own_replies() {
    let (req_tx, req_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = mpsc::unbounded_channel();
    let (router, task) = MessageRouter::new(config(), req_tx, resp_rx);
    let handle = task.spawn();
    let component = spawn_component(req_rx, resp_tx);

    let mut callers = Vec::new();
    for _ in 0..8 {
        let router = router.clone();
        callers.push(tokio::spawn(async move {
            let future = router.send_and_receive(Record::sender_mark()).unwrap();
            let slot = future.slot().to_string();
            let reply = future.get(Duration::from_secs(5)).await.unwrap().unwrap();
            assert_eq!(reply.control.mailbox_slot, Some(slot));
        }));
    }
    for caller in callers {
        caller.await.unwrap();
    }

    // Fire-and-forget requests get no reply and leave nothing pending
    router.send(Record::sender_mark().local()).unwrap();
    assert_eq!(router.pending_count(), 0);

    let stats = handle.stop().await.unwrap();
    assert_eq!(stats.matched, 8);
    assert_eq!(stats.unmatched, 0);

    drop(router);
    assert_eq!(component.await.unwrap(), 8);
}
