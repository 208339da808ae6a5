//! Sends a few synthetic change events through the configured sinks (log only when none are set).

use chrono::{Duration, Utc};
use issue_watch::change_detector::Verdict;
use issue_watch::model::{Query, QueryId, Record, Source, SourceId};
use issue_watch::{ChangeEvent, Notifier, NotifierMux};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_target(false).init();
    let mux = NotifierMux::from_env();

    let query = Query {
        id: QueryId::new(),
        name: "Assigned to me".into(),
        expression: "assignee = currentUser()".into(),
        enabled: true,
    };
    let source = Source {
        id: SourceId::new(),
        name: "Demo Jira".into(),
        url: "https://jira.example.com".into(),
        username: String::new(),
        poll_interval: 1,
        enabled: true,
        token_env: None,
        queries: vec![query.clone()],
    };

    let seq = [
        ("DEMO-1", "Open", Verdict::New),
        ("DEMO-2", "In Progress", Verdict::New),
        ("DEMO-1", "In Review", Verdict::Changed),
    ];

    for (i, (key, status, verdict)) in seq.into_iter().enumerate() {
        let record = Record {
            id: format!("{}", 10_000 + i),
            key: key.into(),
            summary: format!("Demo issue {key}"),
            status: status.into(),
            last_modified: Utc::now() - Duration::minutes(5 - i as i64),
            fields: Default::default(),
        };
        let ev = ChangeEvent::new(&source, query.id, &query.name, &record, verdict);
        if let Err(e) = mux.send(&ev).await {
            eprintln!("send failed: {e:#}");
        }
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    }

    println!("notify-demo done");
}
