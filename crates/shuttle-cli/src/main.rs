use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

use shuttle_core::domain::{ActivityCall, ActivityFailure, Response};
use shuttle_core::ports::StateService;
use shuttle_core::typed::{Activity, ActivityContext, Handler};
use shuttle_core::{FanOut, OrchestratorBuilder, ShuttleConfig};

#[derive(Debug, Serialize, Deserialize)]
struct FetchTicker {
    symbol: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Quote {
    symbol: String,
    price: f64,
}

impl Activity for FetchTicker {
    const NAME: &'static str = "ticker.fetch.v1";
    type Output = Quote;
}

/// Rate-limits the first `n` calls, then answers.
struct FetchTickerHandler {
    remaining_rate_limits: AtomicU32,
}

impl FetchTickerHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_rate_limits: AtomicU32::new(n),
        }
    }
}

/// Takes one from `counter` unless it is already zero; returns the value
/// before the decrement.
fn claim(counter: &AtomicU32) -> Option<u32> {
    counter
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
        .ok()
}

#[async_trait]
impl Handler<FetchTicker> for FetchTickerHandler {
    async fn handle(&self, input: FetchTicker, ctx: ActivityContext) -> Result<Quote, ActivityFailure> {
        if let Some(left) = claim(&self.remaining_rate_limits) {
            info!(attempt = ctx.attempt, left, "upstream says slow down");
            return Err(ActivityFailure::rate_limited(1).unwrap_or_else(ActivityFailure::unclassified));
        }
        Ok(Quote {
            symbol: input.symbol,
            price: 189.5,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ScrapePage {
    url: String,
}

impl Activity for ScrapePage {
    const NAME: &'static str = "scraper.page.v1";
    type Output = String;
}

/// Takes `delay` per page, beating every 100ms; gives up early once abandoned.
struct ScrapePageHandler {
    delay: Duration,
}

#[async_trait]
impl Handler<ScrapePage> for ScrapePageHandler {
    async fn handle(&self, input: ScrapePage, ctx: ActivityContext) -> Result<String, ActivityFailure> {
        let work = async {
            let mut left = self.delay;
            while !left.is_zero() {
                let step = left.min(Duration::from_millis(100));
                sleep(step).await;
                left -= step;
                ctx.heartbeat.beat();
            }
        };
        tokio::select! {
            _ = ctx.abandon.cancelled() => Err(ActivityFailure::unclassified("abandoned")),
            _ = work => Ok(format!("# {}", input.url)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CollectLinks {
    source: String,
}

impl Activity for CollectLinks {
    const NAME: &'static str = "crawler.links.v1";
    type Output = Vec<String>;
}

struct CollectLinksHandler;

#[async_trait]
impl Handler<CollectLinks> for CollectLinksHandler {
    async fn handle(&self, input: CollectLinks, _ctx: ActivityContext) -> Result<Vec<String>, ActivityFailure> {
        Ok((1..=5)
            .map(|i| format!("https://{}/news/{i}", input.source))
            .collect())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG が無ければ info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_err()
    {
        eprintln!("tracing subscriber already installed");
    }

    // (A) 設定と orchestrator を用意
    let config = ShuttleConfig::from_env()?;
    info!(?config, "loaded configuration");

    let orchestrator = OrchestratorBuilder::<Response>::new()
        .register::<FetchTicker, _>(FetchTickerHandler::new(2))?
        .register::<ScrapePage, _>(ScrapePageHandler {
            delay: Duration::from_millis(1500),
        })?
        .register::<CollectLinks, _>(CollectLinksHandler)?
        .expect_activities(&[FetchTicker::NAME, ScrapePage::NAME, CollectLinks::NAME])
        .config(config)
        .build()?;

    // (B) rate limit を 2 回受けてから成功するタスクを最後まで待つ
    let quote = orchestrator
        .run(
            FetchTicker {
                symbol: "AAPL".into(),
            }
            .to_call()?,
            None,
        )
        .await?;
    println!(
        "fetch: status={} attempts={} result={:?}",
        quote.status, quote.attempts, quote.result
    );

    // (C) 予算 1 秒で投げっぱなしにし、状態をポーリングする
    let id = orchestrator
        .start_activity(
            &ScrapePage {
                url: "https://example.com/news".into(),
            },
            Some(Duration::from_secs(1)),
        )
        .await?
        .detach();
    println!("started scrape task: {id}");

    loop {
        let record = orchestrator.state().get(id).await?;
        if record.status.is_terminal() {
            println!(
                "scrape: status={} attempts={} last_failure={:?}",
                record.status, record.attempts, record.last_failure
            );
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    // (D) リンクを集めてから 3 件ずつスクレイプ。各ページは heartbeat を送り続ける
    let (head, report) = orchestrator
        .expand(
            CollectLinks {
                source: "example.com".into(),
            }
            .to_call()?,
            |head| {
                let links = match &head.result {
                    Some(Response::Json(value)) => value.as_array().cloned().unwrap_or_default(),
                    _ => Vec::new(),
                };
                links
                    .into_iter()
                    .map(|url| {
                        ActivityCall::new(ScrapePage::NAME, serde_json::json!({ "url": url }))
                            .with_timeout(Duration::from_secs(5))
                            .with_heartbeat(Duration::from_millis(500))
                    })
                    .collect()
            },
            FanOut::default(),
        )
        .await?;
    println!(
        "crawl: head={} children={} all_succeeded={}",
        head.status,
        report.children.len(),
        report.all_succeeded()
    );

    let counts = orchestrator.counts().await?;
    println!("counts: {}", serde_json::to_string(&counts)?);
    Ok(())
}
