mod common;

use common::{sample_job, TestHarness};
use orchestrator_core::common::pagination::Page;
use orchestrator_core::kernel::jobs::links::JobLink;
use orchestrator_core::kernel::jobs::repository;
use orchestrator_core::kernel::jobs::status::JobStatus;
use orchestrator_core::kernel::user_work;
use orchestrator_core::kernel::workflow_step::WorkflowStep;
use test_context::test_context;

#[test_context(TestHarness)]
#[tokio::test]
async fn create_then_load_round_trips_every_field(ctx: &mut TestHarness) {
    let mut job = sample_job("alice");
    job.service_name = Some("subset".to_string());
    job.provider_id = Some("PROV1".to_string());
    job.labels.insert("urgent".to_string());
    job.add_staging_bucket_link("s3://bucket/alice/output.nc");

    repository::create(&ctx.pool, &mut job).await.unwrap();

    let loaded = repository::by_job_id(&ctx.pool, job.job_id)
        .await
        .unwrap()
        .expect("job should round-trip");

    assert_eq!(loaded.job_id, job.job_id);
    assert_eq!(loaded.username, "alice");
    assert_eq!(loaded.status, JobStatus::Accepted);
    assert_eq!(loaded.service_name.as_deref(), Some("subset"));
    assert_eq!(loaded.provider_id.as_deref(), Some("PROV1"));
    assert!(loaded.labels.contains("urgent"));
    assert_eq!(loaded.links.len(), 1);
    assert_eq!(loaded.links[0].href, "s3://bucket/alice/output.nc");
    assert!(loaded.links[0].id.is_some());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn save_rejects_writes_to_a_loaded_terminal_job(ctx: &mut TestHarness) {
    let mut job = sample_job("bob");
    job.update_status(JobStatus::Running, None).unwrap();
    job.update_status(JobStatus::Successful, None).unwrap();
    repository::create(&ctx.pool, &mut job).await.unwrap();

    let mut loaded = repository::by_job_id(&ctx.pool, job.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.original_status, JobStatus::Successful);

    loaded.progress = 50;
    let mut tx = ctx.pool.begin().await.unwrap();
    let result = repository::save(&mut tx, &mut loaded).await;
    assert!(result.is_err());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn failed_to_failed_resave_is_allowed_by_the_write_barrier(ctx: &mut TestHarness) {
    let mut job = sample_job("carol");
    job.update_status(JobStatus::Running, None).unwrap();
    job.update_status(JobStatus::Failed, Some("first failure".into())).unwrap();
    repository::create(&ctx.pool, &mut job).await.unwrap();

    let mut loaded = repository::by_job_id(&ctx.pool, job.job_id)
        .await
        .unwrap()
        .unwrap();
    loaded.fail(Some("second failure".into())).unwrap();

    let mut tx = ctx.pool.begin().await.unwrap();
    repository::save(&mut tx, &mut loaded).await.unwrap();
    tx.commit().await.unwrap();

    let reloaded = repository::by_job_id(&ctx.pool, job.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.status, JobStatus::Failed);
    assert_eq!(reloaded.message(), "second failure");
}

#[test_context(TestHarness)]
#[tokio::test]
async fn links_are_append_only_across_saves(ctx: &mut TestHarness) {
    let mut job = sample_job("dana");
    job.add_link(JobLink::builder().job_id(job.job_id).href("https://first").build());
    repository::create(&ctx.pool, &mut job).await.unwrap();

    let mut loaded = repository::by_job_id(&ctx.pool, job.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.links.len(), 1);
    loaded.add_link(JobLink::builder().job_id(job.job_id).href("https://second").build());

    let mut tx = ctx.pool.begin().await.unwrap();
    repository::save(&mut tx, &mut loaded).await.unwrap();
    tx.commit().await.unwrap();

    let reloaded = repository::by_job_id(&ctx.pool, job.job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.links.len(), 2);
    let hrefs: Vec<&str> = reloaded.links.iter().map(|l| l.href.as_str()).collect();
    assert!(hrefs.contains(&"https://first"));
    assert!(hrefs.contains(&"https://second"));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn query_all_filters_by_status_and_paginates(ctx: &mut TestHarness) {
    for i in 0..3 {
        let mut job = sample_job(&format!("erin{i}"));
        job.service_name = Some("shared-service".to_string());
        repository::create(&ctx.pool, &mut job).await.unwrap();
    }
    let mut running = sample_job("frank");
    running.service_name = Some("shared-service".to_string());
    running.update_status(JobStatus::Running, None).unwrap();
    repository::create(&ctx.pool, &mut running).await.unwrap();

    let constraints = repository::QueryConstraints {
        service_name_in: vec!["shared-service".to_string()],
        status_in: vec![JobStatus::Accepted],
        ..Default::default()
    };
    let page = Page::new(1, 2);
    let result = repository::query_all(&ctx.pool, &constraints, &page).await.unwrap();

    assert_eq!(result.page_info.total_count, 3);
    assert_eq!(result.items.len(), 2);
    assert!(result.items.iter().all(|j| j.status == JobStatus::Accepted));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn for_user_only_returns_that_users_jobs(ctx: &mut TestHarness) {
    repository::create(&ctx.pool, &mut sample_job("gina")).await.unwrap();
    repository::create(&ctx.pool, &mut sample_job("gina")).await.unwrap();
    repository::create(&ctx.pool, &mut sample_job("harry")).await.unwrap();

    let result = repository::for_user(&ctx.pool, "gina", &Page::default())
        .await
        .unwrap();
    assert_eq!(result.page_info.total_count, 2);
    assert!(result.items.iter().all(|j| j.username == "gina"));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn has_links_matches_on_rel(ctx: &mut TestHarness) {
    let mut job = sample_job("ivy");
    job.add_staging_bucket_link("s3://bucket/ivy/output.nc");
    repository::create(&ctx.pool, &mut job).await.unwrap();

    assert!(repository::has_links(&ctx.pool, job.job_id, Some("s3-access"), None)
        .await
        .unwrap());
    assert!(!repository::has_links(&ctx.pool, job.job_id, Some("other-rel"), None)
        .await
        .unwrap());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn provider_ids_snapshot_reflects_distinct_values(ctx: &mut TestHarness) {
    let mut a = sample_job("jack");
    a.provider_id = Some("PROV-A".to_string());
    repository::create(&ctx.pool, &mut a).await.unwrap();
    let mut b = sample_job("kate");
    b.provider_id = Some("PROV-B".to_string());
    repository::create(&ctx.pool, &mut b).await.unwrap();

    let snapshot = repository::get_provider_ids_snapshot(&ctx.pool).await;
    assert!(snapshot.contains(&"PROV-A".to_string()));
    assert!(snapshot.contains(&"PROV-B".to_string()));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn get_num_input_granules_returns_none_for_an_absent_job(ctx: &mut TestHarness) {
    let missing = repository::get_num_input_granules(&ctx.pool, uuid::Uuid::new_v4())
        .await
        .unwrap();
    assert_eq!(missing, None);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn get_num_input_granules_returns_the_column_value(ctx: &mut TestHarness) {
    let mut job = sample_job("quinn");
    job.num_input_granules = 42;
    repository::create(&ctx.pool, &mut job).await.unwrap();

    let count = repository::get_num_input_granules(&ctx.pool, job.job_id)
        .await
        .unwrap();
    assert_eq!(count, Some(42));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn pause_and_save_zeroes_every_ready_count(ctx: &mut TestHarness) {
    let mut job = sample_job("liam");
    job.update_status(JobStatus::Running, None).unwrap();
    repository::create(&ctx.pool, &mut job).await.unwrap();

    user_work::increment_ready_count(&ctx.pool, job.job_id, "svc-a", "liam", 3)
        .await
        .unwrap();
    user_work::increment_ready_count(&ctx.pool, job.job_id, "svc-b", "liam", 2)
        .await
        .unwrap();

    let paused = repository::pause_and_save(&ctx.pool, job.job_id).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);

    let rows: Vec<i32> = sqlx::query_scalar("SELECT ready_count FROM user_work WHERE job_id = $1")
        .bind(job.job_id)
        .fetch_all(&ctx.pool)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|&ready| ready == 0));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn update_progress_rolls_up_and_persists_when_it_advances(ctx: &mut TestHarness) {
    let mut job = sample_job("nora");
    job.update_status(JobStatus::Running, None).unwrap();
    repository::create(&ctx.pool, &mut job).await.unwrap();

    orchestrator_core::kernel::workflow_step::create(
        &ctx.pool,
        &WorkflowStep::builder()
            .job_id(job.job_id)
            .service_id("svc")
            .step_index(0)
            .work_item_count(4)
            .completed_work_item_count(4)
            .progress_weight(1.0)
            .build(),
    )
    .await
    .unwrap();

    let updated = repository::update_progress(&ctx.pool, job.job_id).await.unwrap();
    assert_eq!(updated.progress, 1);

    let reloaded = repository::by_job_id(&ctx.pool, job.job_id).await.unwrap().unwrap();
    assert_eq!(reloaded.progress, 1);
}
