//! Engine log forwarding.

use std::sync::{Arc, Mutex};

use lockbox::{log_level, Client, ClientConfig, ErrorKind, KeyMethod, LogRecord, LogSink, Store};
use lockbox_testkit::MEMORY_URI;

#[derive(Default)]
struct Collected(Mutex<Vec<(i32, String)>>);

impl Collected {
    fn messages(&self) -> Vec<(i32, String)> {
        self.0.lock().unwrap().clone()
    }
}

impl LogSink for Collected {
    fn log(&self, record: &LogRecord<'_>) {
        self.0
            .lock()
            .unwrap()
            .push((record.level, record.message.to_owned()));
    }
}

#[tokio::test]
async fn test_custom_logger_receives_engine_records() {
    let client = Client::embedded(ClientConfig::default()).unwrap();
    let sink = Arc::new(Collected::default());
    client
        .set_custom_logger(sink.clone(), log_level::INFO)
        .unwrap();

    let store = Store::provision(&client, MEMORY_URI, KeyMethod::None, None, None, false)
        .await
        .unwrap();
    let seen = sink.messages();
    assert!(seen
        .iter()
        .any(|(level, message)| *level == log_level::INFO && message.contains("Provisioned store")));
    assert!(seen.iter().all(|(level, _)| *level <= log_level::INFO));

    client.set_max_log_level(log_level::OFF).unwrap();
    store.close(false).await.unwrap();
    assert_eq!(sink.messages().len(), seen.len());

    client.clear_custom_logger();
    client.set_max_log_level(log_level::TRACE).unwrap();
    let store = Store::provision(&client, MEMORY_URI, KeyMethod::None, None, None, false)
        .await
        .unwrap();
    store.close(false).await.unwrap();
    assert_eq!(sink.messages().len(), seen.len());
}

#[tokio::test]
async fn test_log_level_out_of_range() {
    let client = Client::embedded(ClientConfig::default()).unwrap();
    let err = client.set_max_log_level(9).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
    client.set_max_log_level(log_level::UNCHANGED).unwrap();
}
