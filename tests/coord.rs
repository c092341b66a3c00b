//! In-process coordination backend semantics.

use arena_server::coord::Coordination;

#[tokio::test]
async fn hash_and_set_round_trip() {
    let coord = Coordination::local_only();

    coord.hash_set("q", "a", "1").await.unwrap();
    coord.hash_set("q", "b", "2").await.unwrap();
    coord.set_add("q:players", "a").await.unwrap();
    coord.set_add("q:players", "b").await.unwrap();

    let mut all = coord.hash_get_all("q").await.unwrap();
    all.sort();
    assert_eq!(
        all,
        vec![("a".into(), "1".into()), ("b".into(), "2".into())]
    );
    assert_eq!(coord.set_size("q:players").await.unwrap(), 2);

    assert!(coord.hash_del("q", "a").await.unwrap());
    assert!(!coord.hash_del("q", "a").await.unwrap());
    assert!(coord.set_del("q:players", "a").await.unwrap());
    assert_eq!(coord.set_size("q:players").await.unwrap(), 1);
    assert_eq!(coord.set_members("q:players").await.unwrap(), vec!["b"]);
}

#[tokio::test]
async fn publish_reaches_every_subscriber() {
    let coord = Coordination::local_only();

    let mut rx1 = coord.subscribe("events").await.unwrap();
    let mut rx2 = coord.subscribe("events").await.unwrap();
    coord.publish("events", "hello").await.unwrap();

    assert_eq!(rx1.recv().await.as_deref(), Some("hello"));
    assert_eq!(rx2.recv().await.as_deref(), Some("hello"));
}

#[tokio::test]
async fn publishing_without_subscribers_is_fine() {
    let coord = Coordination::local_only();
    coord.publish("nobody-listens", "x").await.unwrap();
}

#[tokio::test]
async fn local_only_mode_reports_degraded() {
    let coord = Coordination::local_only();
    assert!(coord.is_degraded());
    coord.ping().await.unwrap();
}
