use std::time::Duration;

use sqlx::PgPool;

use vellum::application::jobs::{RenderTaskRequest, TaskQueue};
use vellum::application::repos::{
    ClaimRenderParams, RenderClaim, RenderQueryFilter, RendersRepo, TaskResultsRepo,
    UpdateRenderStateParams,
};
use vellum::domain::renders::SourceRef;
use vellum::domain::tasks::{RenderResult, TaskReport};
use vellum::domain::types::{RenderState, SourceType};
use vellum::infra::db::{PostgresRepositories, PostgresTaskQueue};

fn claim(id: &str, stale_after: Duration) -> ClaimRenderParams {
    ClaimRenderParams {
        source: SourceRef::new(SourceType::Arxiv, id).expect("valid source"),
        stale_after,
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn claims_create_once_then_return_the_existing_record(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let lease = Duration::from_secs(300);

    let first = repos
        .claim_render(claim("1707.08219", lease))
        .await
        .expect("first claim");
    let RenderClaim::Created(created) = first else {
        panic!("expected a new record, got {first:?}");
    };
    assert_eq!(created.state, RenderState::Pending);

    let second = repos
        .claim_render(claim("1707.08219", lease))
        .await
        .expect("second claim");
    assert_eq!(second, RenderClaim::Existing(created.clone()));

    let other = repos
        .claim_render(claim("1812.00001", lease))
        .await
        .expect("other document");
    assert!(matches!(other, RenderClaim::Created(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_claims_produce_one_record(pool: PgPool) {
    let repos = PostgresRepositories::new(pool.clone());
    let lease = Duration::from_secs(300);

    let claims = (0..8).map(|_| {
        let repos = repos.clone();
        async move { repos.claim_render(claim("1707.08219", lease)).await }
    });
    let results = futures::future::join_all(claims).await;

    let created = results
        .iter()
        .filter(|result| matches!(result, Ok(RenderClaim::Created(_))))
        .count();
    assert_eq!(created, 1);

    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM renders")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(count, 1);
}

#[sqlx::test(migrations = "./migrations")]
async fn unsubmitted_claims_are_reclaimed_after_the_lease(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);

    let RenderClaim::Created(created) = repos
        .claim_render(claim("1707.08219", Duration::from_secs(300)))
        .await
        .expect("claim")
    else {
        panic!("expected a new record");
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    let reclaimed = repos
        .claim_render(claim("1707.08219", Duration::from_millis(10)))
        .await
        .expect("reclaim");
    assert!(matches!(reclaimed, RenderClaim::Reclaimed(ref record) if record.id == created.id));

    assert!(
        repos
            .assign_task_id(created.id, "42")
            .await
            .expect("assign")
    );
    let after = repos
        .claim_render(claim("1707.08219", Duration::ZERO))
        .await
        .expect("claim after submit");
    assert!(matches!(after, RenderClaim::Existing(ref record) if record.task_id.as_deref() == Some("42")));
}

#[sqlx::test(migrations = "./migrations")]
async fn task_ids_are_assigned_once(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let RenderClaim::Created(created) = repos
        .claim_render(claim("1707.08219", Duration::from_secs(300)))
        .await
        .expect("claim")
    else {
        panic!("expected a new record");
    };

    assert!(repos.assign_task_id(created.id, "7").await.expect("first"));
    assert!(!repos.assign_task_id(created.id, "8").await.expect("second"));

    let stored = repos
        .find_render(created.id)
        .await
        .expect("find")
        .expect("present");
    assert_eq!(stored.task_id.as_deref(), Some("7"));
}

#[sqlx::test(migrations = "./migrations")]
async fn state_updates_and_listing_round_through_postgres(pool: PgPool) {
    let repos = PostgresRepositories::new(pool);
    let RenderClaim::Created(created) = repos
        .claim_render(claim("1707.08219", Duration::from_secs(300)))
        .await
        .expect("claim")
    else {
        panic!("expected a new record");
    };

    repos
        .update_render_state(UpdateRenderStateParams {
            id: created.id,
            state: RenderState::Failure,
            logs: Some("boom".into()),
        })
        .await
        .expect("update");

    let failed = repos
        .list_renders(
            &RenderQueryFilter {
                state: Some(RenderState::Failure),
                source_type: Some(SourceType::Arxiv),
            },
            10,
        )
        .await
        .expect("list");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].logs.as_deref(), Some("boom"));

    let latest = repos
        .find_latest_render(&SourceRef::new(SourceType::Arxiv, "1707.08219").expect("source"))
        .await
        .expect("latest")
        .expect("present");
    assert_eq!(latest.id, created.id);
}

#[sqlx::test(migrations = "./migrations")]
async fn queued_tasks_report_pending_and_unknown_tasks_too(pool: PgPool) {
    PostgresRepositories::run_migrations(&pool)
        .await
        .expect("queue schema");
    let repos = PostgresRepositories::new(pool);
    let queue = PostgresTaskQueue::new(repos.clone(), 3);

    let task_id = queue
        .submit(RenderTaskRequest {
            source_location: "https://arxiv.org/src/1707.08219".into(),
            output_location: "render-output/x".into(),
        })
        .await
        .expect("submit");

    assert_eq!(queue.status(&task_id).await.expect("status"), TaskReport::Pending);
    assert_eq!(
        queue.status("no-such-task").await.expect("status"),
        TaskReport::Pending
    );

    repos
        .store_result(
            uuid::Uuid::new_v4(),
            &RenderResult {
                exit_code: 0,
                logs: "OK".into(),
            },
        )
        .await
        .expect("results table accepts writes");
}

#[sqlx::test(migrations = false)]
async fn schema_setup_runs_on_a_fresh_database_and_again_on_restart(pool: PgPool) {
    PostgresRepositories::run_migrations(&pool)
        .await
        .expect("first boot");
    PostgresRepositories::run_migrations(&pool)
        .await
        .expect("second boot");

    let (renders, jobs): (Option<String>, Option<String>) = sqlx::query_as(
        "SELECT to_regclass('public.renders')::text, to_regclass('apalis.jobs')::text",
    )
    .fetch_one(&pool)
    .await
    .expect("catalog lookup");
    assert!(renders.is_some());
    assert!(jobs.is_some());
}
