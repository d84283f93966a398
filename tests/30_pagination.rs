mod common;

use anyhow::Result;
use serde_json::{json, Value};
use std::collections::HashSet;

use fimidx_store::pagination::PageMode;
use fimidx_store::services::GetManyRequest;
use fimidx_store::storage::StoreError;
use fimidx_store::types::Tag;

fn page(page: u64, limit: u64) -> GetManyRequest {
    GetManyRequest { page: Some(page), limit: Some(limit), ..Default::default() }
}

#[tokio::test]
async fn exact_pages_keep_a_stable_total() -> Result<()> {
    let service = common::memory_service();
    let scope = common::scope();
    let members: Vec<Value> = (1..=5).map(|n| json!({"n": n})).collect();
    service.set_many_objs(&scope, Tag::Member, common::items(members)).await?;

    let mut seen = HashSet::new();
    for number in 1..=3u64 {
        let result = service.get_many_objs(&scope, Tag::Member, page(number, 2)).await?;
        assert_eq!(result.total, Some(5));
        assert_eq!(result.has_more, number * 2 < 5);
        for obj in result.items {
            assert!(seen.insert(obj.id), "object repeated across pages");
        }
    }
    assert_eq!(seen.len(), 5);

    let beyond = service.get_many_objs(&scope, Tag::Member, page(4, 2)).await?;
    assert!(beyond.items.is_empty());
    assert!(!beyond.has_more);
    Ok(())
}

#[tokio::test]
async fn probe_pages_look_one_row_ahead() -> Result<()> {
    let service = common::memory_service();
    let scope = common::scope();
    let logs: Vec<Value> = (1..=3).map(|n| json!({"n": n})).collect();
    service.set_many_objs(&scope, Tag::Log, common::items(logs)).await?;

    let first = service.get_many_objs(&scope, Tag::Log, page(1, 2)).await?;
    assert_eq!(first.items.len(), 2);
    assert!(first.has_more);
    assert_eq!(first.total, None);

    let second = service.get_many_objs(&scope, Tag::Log, page(2, 2)).await?;
    assert_eq!(second.items.len(), 1);
    assert!(!second.has_more);

    let exact_on_page_boundary = service.get_many_objs(&scope, Tag::Log, page(1, 3)).await?;
    assert!(!exact_on_page_boundary.has_more);
    Ok(())
}

#[tokio::test]
async fn callers_may_override_the_page_mode() -> Result<()> {
    let service = common::memory_service();
    let scope = common::scope();
    service.set_many_objs(&scope, Tag::Log, common::items(vec![json!({"n": 1})])).await?;

    let request = GetManyRequest { page_mode: Some(PageMode::Exact), ..page(1, 10) };
    let result = service.get_many_objs(&scope, Tag::Log, request).await?;
    assert_eq!(result.total, Some(1));
    Ok(())
}

#[tokio::test]
async fn limits_are_bounded() -> Result<()> {
    let service = common::memory_service();
    let scope = common::scope();
    let max = u64::from(service.config().filter.max_limit);

    let result = service.get_many_objs(&scope, Tag::Member, page(1, max * 10)).await?;
    assert_eq!(result.limit, max);

    for bad in [page(0, 10), page(1, 0)] {
        assert!(matches!(
            service.get_many_objs(&scope, Tag::Member, bad).await,
            Err(StoreError::Validation { .. })
        ));
    }
    Ok(())
}

#[tokio::test]
async fn explicit_sort_puts_missing_values_last() -> Result<()> {
    let service = common::memory_service();
    let scope = common::scope();
    service
        .set_many_objs(
            &scope,
            Tag::Member,
            common::items(vec![json!({"n": 2}), json!({"other": true}), json!({"n": 10}), json!({"n": 1})]),
        )
        .await?;

    let desc = GetManyRequest { sort: Some(json!([{"field": "n", "direction": "desc"}])), ..page(1, 10) };
    let result = service.get_many_objs(&scope, Tag::Member, desc).await?;
    let ns: Vec<Value> = result.items.iter().map(|o| o.data.get("n").cloned().unwrap_or(Value::Null)).collect();
    assert_eq!(ns, vec![json!(10), json!(2), json!(1), Value::Null]);

    let asc = GetManyRequest { sort: Some(json!("n asc")), ..page(1, 10) };
    let result = service.get_many_objs(&scope, Tag::Member, asc).await?;
    let ns: Vec<Value> = result.items.iter().map(|o| o.data.get("n").cloned().unwrap_or(Value::Null)).collect();
    assert_eq!(ns, vec![json!(1), json!(2), json!(10), Value::Null]);
    Ok(())
}

#[tokio::test]
async fn default_order_is_insertion_order() -> Result<()> {
    let service = common::memory_service();
    let scope = common::scope();
    for n in 1..=3 {
        service.set_many_objs(&scope, Tag::Member, common::items(vec![json!({"n": n})])).await?;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let result = service.get_many_objs(&scope, Tag::Member, page(1, 10)).await?;
    let ns: Vec<Value> = result.items.iter().map(|o| o.data["n"].clone()).collect();
    assert_eq!(ns, vec![json!(1), json!(2), json!(3)]);
    Ok(())
}
