mod stub_site;

use std::time::Duration;

use dbd_harvest::fetch::FetchError;
use stub_site::{RecordingSleeper, StubSite, fetcher_with};

#[tokio::test]
async fn rate_limit_backs_off_then_succeeds() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.route_sequence(
        "/page",
        vec![
            (429, "slow down".to_owned()),
            (429, "slow down".to_owned()),
            (200, "<html>ok</html>".to_owned()),
        ],
    );
    let temp = tempfile::TempDir::new()?;
    let config = site.config(temp.path());
    let sleeper = RecordingSleeper::default();
    let fetcher = fetcher_with(&config, &sleeper);

    let body = fetcher.fetch(&format!("{}/page", site.base_url)).await?;

    assert_eq!(body, "<html>ok</html>");
    assert_eq!(site.hits("/page"), 3);
    assert_eq!(
        sleeper.slept(),
        vec![Duration::from_secs(5), Duration::from_secs(10)]
    );
    Ok(())
}

#[tokio::test]
async fn rate_limit_gives_up_after_three_attempts() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.route("/page", 429, "slow down");
    let temp = tempfile::TempDir::new()?;
    let config = site.config(temp.path());
    let sleeper = RecordingSleeper::default();
    let fetcher = fetcher_with(&config, &sleeper);

    let err = fetcher
        .fetch(&format!("{}/page", site.base_url))
        .await
        .expect_err("should stay rate limited");

    assert!(
        matches!(err, FetchError::RateLimited { attempts: 3, .. }),
        "unexpected error: {err:?}"
    );
    assert_eq!(site.hits("/page"), 3);
    // No pause after the final refusal.
    assert_eq!(
        sleeper.slept(),
        vec![Duration::from_secs(5), Duration::from_secs(10)]
    );
    Ok(())
}

#[tokio::test]
async fn other_http_errors_are_not_retried() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.route("/page", 500, "boom");
    let temp = tempfile::TempDir::new()?;
    let config = site.config(temp.path());
    let sleeper = RecordingSleeper::default();
    let fetcher = fetcher_with(&config, &sleeper);

    let err = fetcher
        .fetch(&format!("{}/page", site.base_url))
        .await
        .expect_err("500 should fail");

    assert!(
        matches!(err, FetchError::Http { status: 500, .. }),
        "unexpected error: {err:?}"
    );
    assert_eq!(site.hits("/page"), 1);
    assert!(sleeper.slept().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_page_is_an_http_error() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    let temp = tempfile::TempDir::new()?;
    let config = site.config(temp.path());
    let fetcher = fetcher_with(&config, &RecordingSleeper::default());

    let err = fetcher
        .fetch(&format!("{}/nowhere", site.base_url))
        .await
        .expect_err("404 should fail");
    assert!(matches!(err, FetchError::Http { status: 404, .. }));
    Ok(())
}

#[tokio::test]
async fn fresh_fetch_defeats_caches() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.route("/p/dbd-06-02-2025-b/comments", 200, "12 Comments");
    let temp = tempfile::TempDir::new()?;
    let config = site.config(temp.path());
    let fetcher = fetcher_with(&config, &RecordingSleeper::default());

    let body = fetcher
        .fetch_fresh(&config.comments_url("dbd-06-02-2025-b"))
        .await?;
    assert_eq!(body, "12 Comments");

    let requests = site.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.header("cache-control"), Some("no-cache"));
    assert_eq!(request.header("pragma"), Some("no-cache"));
    let query = request.query.as_deref().unwrap_or_default();
    let stamp = query.strip_prefix("t=").expect("t= query parameter");
    assert!(stamp.parse::<i64>().is_ok(), "timestamp query: {query}");
    assert!(request.header("user-agent").is_some());
    Ok(())
}

#[tokio::test]
async fn plain_fetch_sends_no_cache_busting() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.route("/page", 200, "ok");
    let temp = tempfile::TempDir::new()?;
    let config = site.config(temp.path());
    let fetcher = fetcher_with(&config, &RecordingSleeper::default());

    fetcher.fetch(&format!("{}/page", site.base_url)).await?;

    let requests = site.requests();
    assert_eq!(requests[0].query, None);
    assert_eq!(requests[0].header("cache-control"), None);
    Ok(())
}

#[tokio::test]
async fn unreachable_host_is_a_network_error() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let config = dbd_harvest::config::Config {
        base_url: "http://127.0.0.1:1".to_owned(),
        state_dir: temp.path().to_path_buf(),
        http_timeout: Duration::from_secs(5),
        ..dbd_harvest::config::Config::default()
    };
    let sleeper = RecordingSleeper::default();
    let fetcher = fetcher_with(&config, &sleeper);

    let err = fetcher
        .fetch("http://127.0.0.1:1/sitemap.xml")
        .await
        .expect_err("nothing listens on port 1");
    assert!(matches!(err, FetchError::Network { .. }), "unexpected error: {err:?}");
    assert!(sleeper.slept().is_empty());
    Ok(())
}
