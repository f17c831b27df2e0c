use super::*;
use crate::orchestrator::error::StoreError;

fn entry(platform: &str, provider: &str, created_at: &str) -> NewRequestLog {
    NewRequestLog {
        platform: platform.to_string(),
        model: "claude-sonnet-4".to_string(),
        provider: provider.to_string(),
        http_code: 200,
        input_tokens: 10,
        output_tokens: 5,
        created_at: Some(created_at.to_string()),
        ..Default::default()
    }
}

#[test]
fn queries_before_schema_report_missing_table() {
    let store = RequestLogStore::open_in_memory().unwrap();
    assert!(matches!(
        store.list_recent("", "", 10),
        Err(StoreError::MissingTable)
    ));
    assert!(matches!(
        store.distinct_providers(""),
        Err(StoreError::MissingTable)
    ));
    assert!(matches!(
        store.usage_rows_since("2025-01-01", ""),
        Err(StoreError::MissingTable)
    ));
}

#[test]
fn list_recent_is_newest_first_and_filtered() {
    let tmp = tempfile::tempdir().unwrap();
    let store = RequestLogStore::open(&tmp.path().join("app.db")).unwrap();
    store.ensure_schema().unwrap();

    let a = store.append(&entry("claude", "p1", "2025-06-15 10:00:00")).unwrap();
    let b = store.append(&entry("codex", "p2", "2025-06-15 10:01:00")).unwrap();
    let c = store.append(&entry("claude", "p2", "2025-06-15 10:02:00")).unwrap();

    let all = store.list_recent("", "", 10).unwrap();
    assert_eq!(all.iter().map(|r| r.id).collect::<Vec<_>>(), vec![c, b, a]);

    let claude = store.list_recent("claude", "", 10).unwrap();
    assert_eq!(claude.iter().map(|r| r.id).collect::<Vec<_>>(), vec![c, a]);

    let claude_p2 = store.list_recent("claude", "p2", 10).unwrap();
    assert_eq!(claude_p2.len(), 1);
    assert_eq!(claude_p2[0].id, c);
    assert_eq!(claude_p2[0].created_at, "2025-06-15 10:02:00");

    assert_eq!(store.list_recent("", "", 1).unwrap().len(), 1);
}

#[test]
fn distinct_providers_trims_and_skips_blank() {
    let store = RequestLogStore::open_in_memory().unwrap();
    store.ensure_schema().unwrap();
    for (platform, provider) in [
        ("claude", "zeta"),
        ("claude", " alpha "),
        ("claude", ""),
        ("codex", "   "),
        ("codex", "beta"),
        ("claude", "zeta"),
    ] {
        store
            .append(&entry(platform, provider, "2025-06-15 10:00:00"))
            .unwrap();
    }
    assert_eq!(
        store.distinct_providers("").unwrap(),
        vec!["alpha", "beta", "zeta"]
    );
    assert_eq!(store.distinct_providers("codex").unwrap(), vec!["beta"]);
}

#[test]
fn append_defaults_created_at_to_local_now() {
    let store = RequestLogStore::open_in_memory().unwrap();
    store.ensure_schema().unwrap();
    store
        .append(&NewRequestLog {
            platform: "claude".to_string(),
            ..Default::default()
        })
        .unwrap();
    let row = store.list_recent("", "", 1).unwrap().remove(0);
    assert!(parse_created_at(&row.created_at).is_some());
}

#[test]
fn integer_and_null_columns_are_readable() {
    let store = RequestLogStore::open_in_memory().unwrap();
    store.ensure_schema().unwrap();
    {
        let conn = store.conn.lock();
        conn.execute(
            "INSERT INTO request_log (platform, provider, created_at) VALUES ('claude', 'p1', 1750000000)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO request_log (platform, provider, created_at, input_tokens) VALUES ('claude', 'p1', NULL, NULL)",
            [],
        )
        .unwrap();
    }
    let rows = store.list_recent("", "", 10).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].created_at, "");
    assert_eq!(rows[0].input_tokens, 0);
    assert!(parse_created_at(&rows[1].created_at).is_some());
}
