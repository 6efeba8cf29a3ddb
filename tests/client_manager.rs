//! Module-side connection management over the in-memory transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use broker_gateway::client::{BrokerClientManager, ClientError, Dispatch};
use broker_gateway::cluster::{run_membership, MembershipEvent, MembershipListener};
use broker_gateway::load_balancer::SelectorStrategy;
use broker_gateway::net::memory::MemoryConnector;
use broker_gateway::net::{Connection, ConnectionEvent, ConnectionStatus};
use broker_gateway::protocol::{Frame, RequestMessage, ResponseMessage, RouteKey, StatusCode};
use tokio::sync::{broadcast, mpsc};

mod common;

const KEY: RouteKey = RouteKey::merge(1, 5);
const GATEWAYS: [&str; 3] = ["10.0.2.1:10200", "10.0.2.2:10200", "10.0.2.3:10200"];

fn manager(connector: Arc<MemoryConnector>) -> BrokerClientManager {
    BrokerClientManager::builder(common::logic_info("10.0.0.1:9000", &[KEY]), connector)
        .strategy(SelectorStrategy::RoundRobin)
        .request_timeout(Duration::from_millis(50))
        .open_log(false)
        .build()
}

#[tokio::test]
async fn only_registered_gateways_are_selected() {
    let connector = Arc::new(MemoryConnector::new());
    connector.refuse(GATEWAYS[1]);
    let manager = manager(connector);

    let failures = manager.init(&GATEWAYS).await;
    assert_eq!(failures.len(), 1);
    assert_eq!(manager.count_active(), 2);

    let picked: Vec<String> = (0..4).map(|_| manager.next().unwrap().address().to_string()).collect();
    assert_eq!(picked, vec![GATEWAYS[0], GATEWAYS[2], GATEWAYS[0], GATEWAYS[2]]);
}

#[tokio::test]
async fn exception_excludes_until_registered_again() {
    let connector = Arc::new(MemoryConnector::new());
    let manager = manager(connector.clone());
    manager.init(&GATEWAYS[..2]).await;

    connector.emit(GATEWAYS[0], ConnectionEvent::Exception);

    let stale = manager.get(GATEWAYS[0]).unwrap();
    assert_eq!(stale.status(), ConnectionStatus::Disconnect);
    assert!(manager.contains(GATEWAYS[0]));
    for _ in 0..5 {
        assert_eq!(manager.next().unwrap().address(), GATEWAYS[1]);
    }

    manager.register(GATEWAYS[0]).await.unwrap();
    assert_eq!(manager.count_active(), 2);
    assert_eq!(manager.len(), 2);
}

#[tokio::test]
async fn all_gateways_lost_means_no_active_connection() {
    let connector = Arc::new(MemoryConnector::new());
    let manager = manager(connector.clone());
    manager.init(&GATEWAYS).await;

    for gateway in GATEWAYS {
        connector.emit(gateway, ConnectionEvent::Close);
    }

    assert!(matches!(manager.next(), Err(ClientError::NoActiveConnection)));
    assert_eq!(manager.key_set().len(), 3);
    let request = common::request(KEY, 1, b"");
    assert!(matches!(manager.send_request(request), Err(ClientError::NoActiveConnection)));
}

#[tokio::test]
async fn forwarded_requests_reach_dispatch_and_are_answered() {
    let connector = Arc::new(MemoryConnector::new());
    let dispatch: Arc<dyn Dispatch> = Arc::new(|request: RequestMessage| -> ResponseMessage {
        let mut data = request.data.clone();
        data.reverse();
        request.create_response().with_data(data)
    });
    let manager = BrokerClientManager::builder(common::logic_info("10.0.0.1:9000", &[KEY]), connector.clone())
        .dispatch(dispatch)
        .open_log(false)
        .build();
    manager.register(GATEWAYS[0]).await.unwrap();

    connector.deliver(GATEWAYS[0], None, Frame::Request(common::request(KEY, 11, b"abc")));

    let sent = connector.connection(GATEWAYS[0]).unwrap().sent_frames();
    match sent.last() {
        Some(Frame::Response(response)) => {
            assert_eq!(response.status, StatusCode::Ok);
            assert_eq!(response.head.msg_id, 11);
            assert_eq!(response.data, b"cba".to_vec());
        }
        other => panic!("expected a response, got {other:?}"),
    }
}

#[tokio::test]
async fn requests_go_out_through_the_selected_gateway() {
    let connector = Arc::new(MemoryConnector::new());
    let manager = manager(connector.clone());
    manager.register(GATEWAYS[0]).await.unwrap();

    manager.send_request(common::request(KEY, 2, b"ping")).unwrap();

    let sent = connector.connection(GATEWAYS[0]).unwrap().sent_frames();
    assert_eq!(sent.last(), Some(&Frame::Request(common::request(KEY, 2, b"ping"))));
}

#[tokio::test]
async fn membership_events_add_and_remove_gateways() {
    let connector = Arc::new(MemoryConnector::new());
    let manager = Arc::new(manager(connector.clone()));
    let (tx, rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(run_membership(manager.clone(), rx, shutdown_rx));

    for gateway in GATEWAYS {
        tx.send(MembershipEvent::Joined(gateway.to_string())).unwrap();
    }
    tx.send(MembershipEvent::Left(GATEWAYS[1].to_string())).unwrap();

    assert!(common::wait_until(Duration::from_secs(2), || manager.len() == 2 && !manager.contains(GATEWAYS[1])).await);
    let left = connector.connection(GATEWAYS[1]).unwrap();
    assert!(!left.is_open());

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
}

#[tokio::test]
async fn join_reconnects_a_gateway_whose_connection_dropped() {
    let connector = Arc::new(MemoryConnector::new());
    let manager = manager(connector.clone());
    manager.register(GATEWAYS[0]).await.unwrap();

    connector.emit(GATEWAYS[0], ConnectionEvent::Close);
    assert!(manager.contains(GATEWAYS[0]));
    assert_eq!(manager.count_active(), 0);

    manager.address_joined(GATEWAYS[0]).await;
    assert_eq!(connector.attempts(), 2);
    assert_eq!(manager.count_active(), 1);
    assert_eq!(manager.next().unwrap().address(), GATEWAYS[0]);

    // Already active: a repeated join does not dial again.
    manager.address_joined(GATEWAYS[0]).await;
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn removed_gateway_is_never_selected_once_removal_returns() {
    const RETIRED: &str = "10.0.2.99:10200";
    let connector = Arc::new(MemoryConnector::new());
    let manager = Arc::new(manager(connector));
    manager.init(&GATEWAYS).await;
    manager.register(RETIRED).await.unwrap();
    let removed = Arc::new(AtomicBool::new(false));

    let mut readers = Vec::new();
    for _ in 0..4 {
        let (manager, removed) = (Arc::clone(&manager), Arc::clone(&removed));
        readers.push(tokio::spawn(async move {
            for _ in 0..2_000 {
                let after_removal = removed.load(Ordering::SeqCst);
                if let Ok(item) = manager.next() {
                    if after_removal {
                        assert_ne!(item.address(), RETIRED);
                    }
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    let churn = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            for round in 0..60 {
                let gateway = GATEWAYS[round % GATEWAYS.len()];
                if round % 2 == 0 {
                    manager.remove(gateway);
                } else {
                    manager.register(gateway).await.unwrap();
                }
                tokio::task::yield_now().await;
            }
        })
    };

    tokio::task::yield_now().await;
    assert!(manager.remove(RETIRED).is_some());
    removed.store(true, Ordering::SeqCst);

    churn.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    assert!(!manager.contains(RETIRED));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn selection_is_safe_during_churn() {
    let connector = Arc::new(MemoryConnector::new());
    let manager = Arc::new(manager(connector.clone()));
    manager.init(&GATEWAYS).await;

    let mut readers = Vec::new();
    for _ in 0..4 {
        let manager = Arc::clone(&manager);
        readers.push(tokio::spawn(async move {
            for _ in 0..2_000 {
                match manager.next() {
                    Ok(item) => assert!(GATEWAYS.iter().any(|g| *g == item.address())),
                    Err(e) => assert!(matches!(e, ClientError::NoActiveConnection)),
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    for round in 0..60 {
        let gateway = GATEWAYS[round % GATEWAYS.len()];
        if round % 2 == 0 {
            manager.remove(gateway);
        } else {
            manager.register(gateway).await.unwrap();
        }
    }

    for reader in readers {
        reader.await.unwrap();
    }
    manager.shutdown();
    assert!(manager.is_empty());
    assert!(matches!(manager.next(), Err(ClientError::NoActiveConnection)));
}
