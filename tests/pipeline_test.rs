use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nfce_crawler::broker::{Broker, SqliteBroker};
use nfce_crawler::consumer::Consumer;
use nfce_crawler::crawler::ReceiptCrawler;
use nfce_crawler::db::{self, Delivery};
use nfce_crawler::error::{CrawlError, ParseError, RenderError};
use nfce_crawler::extract::ExtractSettings;
use nfce_crawler::model::FailureMessage;
use nfce_crawler::renderer::{Page, Renderer};
use nfce_crawler::router::{Channels, Route};
use nfce_crawler::schema::{Region, ERROR_BANNER};

const INBOUND: &str = "CONSULTAR_NFE_QRCODE";
const PRODUCER: &str = "GERAR_CUPOM";
const EXECUTION_DESTROYED: &str = "EXECUTION_DESTROYED";
const CANNOT_RECOVER: &str = "NAO_POSSIVEL_RECUPERAR_NFC";
const DEAD_LETTER: &str = "DEAD_CONSULTAR_NFE_QRCODE";

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn settings() -> ExtractSettings {
    ExtractSettings {
        base_url: "https://nfce.example/consulta?p=".into(),
        navigation_timeout: Duration::from_secs(60),
        ready_timeout: Duration::from_secs(5),
    }
}

/// Page contents keyed by selector, plus knobs for failure paths.
#[derive(Clone, Default)]
struct Script {
    regions: HashMap<String, Vec<String>>,
    navigation_timeout: bool,
    destroyed_on: Option<String>,
}

impl Script {
    fn region(mut self, region: Region, texts: &[&str]) -> Self {
        self.regions.insert(
            region.selector().to_string(),
            texts.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    fn banner(mut self, text: &str) -> Self {
        self.regions.insert(ERROR_BANNER.to_string(), vec![text.to_string()]);
        self
    }

    fn valid_receipt() -> Self {
        Script::default()
            .region(Region::Merchant, &["SUPERMERCADO BOM PRECO LTDA"])
            .region(
                Region::Identity,
                &["CNPJ:\n12.345.678/0001-90", "AV BRASIL, 100, CENTRO, PORTO ALEGRE, RS"],
            )
            .region(Region::Totals, &["2", "57,80", "57,80"])
            .region(Region::TotalRow, &["Valor a pagar R$:\n57,80"])
            .region(Region::AccessKey, &["4323 0512 3456 7800 0190"])
            .region(
                Region::EmissionInfo,
                &["Modelo: 65 Série: 1 Número: 4521 Emissão: 10/05/2023 14:22:11 - Via Consumidor"],
            )
            .region(
                Region::ItemName,
                &["ARROZ 5KG", "Vl. Total\n49,80", "CAFE 500G", "Vl. Total\n8,00"],
            )
            .region(Region::ItemCode, &["(Código: 7891000100103 )", "(Código: 7896005800027 )"])
            .region(Region::ItemQuantity, &["Qtde.:\n2", "Qtde.:\n1"])
            .region(Region::ItemUnit, &["UN:\nUN", "UN:\nPC"])
            .region(Region::ItemUnitPrice, &["Vl. Unit.:\n24,90", "Vl. Unit.:\n8,00"])
    }
}

#[derive(Clone, Default)]
struct ScriptedRenderer {
    script: Script,
    reads: Arc<Mutex<Vec<String>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedRenderer {
    fn new(script: Script) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    fn reads(&self) -> Vec<String> {
        self.reads.lock().unwrap().clone()
    }
}

struct ScriptedPage {
    script: Script,
    reads: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedPage {
    fn read(&self, selector: &str) -> Result<Vec<String>, RenderError> {
        self.reads.lock().unwrap().push(selector.to_string());
        if self.script.destroyed_on.as_deref() == Some(selector) {
            return Err(RenderError::ExecutionDestroyed(
                "most likely because of a navigation".into(),
            ));
        }
        Ok(self.script.regions.get(selector).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn open_page(&self) -> Result<Box<dyn Page>, RenderError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedPage {
            script: self.script.clone(),
            reads: self.reads.clone(),
            closed: self.closed.clone(),
        }))
    }
}

#[async_trait]
impl Page for ScriptedPage {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<(), RenderError> {
        if self.script.navigation_timeout {
            return Err(RenderError::Timeout {
                action: format!("loading {url}"),
                waited: timeout,
            });
        }
        Ok(())
    }

    async fn wait_for(&mut self, _selector: &str, _timeout: Duration) -> Result<(), RenderError> {
        Ok(())
    }

    async fn text_of(&self, selector: &str) -> Result<Option<String>, RenderError> {
        Ok(self.read(selector)?.into_iter().next())
    }

    async fn texts_of(&self, selector: &str) -> Result<Vec<String>, RenderError> {
        self.read(selector)
    }

    async fn close(self: Box<Self>) -> Result<(), RenderError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn consumer_with(broker: Arc<dyn Broker>, renderer: ScriptedRenderer) -> Consumer {
    let crawler = ReceiptCrawler::new(Arc::new(renderer), settings());
    Consumer::new(broker, crawler, INBOUND, Channels::with_producer(PRODUCER))
}

async fn bodies(pool: &sqlx::SqlitePool, queue: &str) -> Vec<Value> {
    db::pending_bodies(pool, queue)
        .await
        .unwrap()
        .iter()
        .map(|b| serde_json::from_slice(b).unwrap())
        .collect()
}

async fn outbound_counts(pool: &sqlx::SqlitePool) -> [usize; 4] {
    [
        bodies(pool, PRODUCER).await.len(),
        bodies(pool, EXECUTION_DESTROYED).await.len(),
        bodies(pool, CANNOT_RECOVER).await.len(),
        bodies(pool, DEAD_LETTER).await.len(),
    ]
}

#[tokio::test]
async fn valid_page_is_forwarded_to_producer() {
    let pool = setup_pool().await;
    let renderer = ScriptedRenderer::new(Script::valid_receipt());
    let consumer = consumer_with(Arc::new(SqliteBroker::new(pool.clone())), renderer.clone());

    db::enqueue(
        &pool,
        INBOUND,
        br#"{"chave":"43230512345678000190","user":"u1","cpf":"123"}"#,
    )
    .await
    .unwrap();

    let route = consumer.process_next().await.unwrap();
    assert_eq!(route, Some(Route::Success));
    assert_eq!(outbound_counts(&pool).await, [1, 0, 0, 0]);
    assert_eq!(db::count_pending(&pool, INBOUND).await.unwrap(), 0);

    let sent = bodies(&pool, PRODUCER).await;
    let msg = &sent[0];
    assert_eq!(msg["pattern"], json!("gerar_cupom"));
    assert_eq!(msg["user"], json!("u1"));
    assert_eq!(msg["cpf"], json!("123"));

    let nota = &msg["notaFiscal"];
    assert_eq!(nota["razao_social"], json!("SUPERMERCADO BOM PRECO LTDA"));
    assert_eq!(nota["cnpj"], json!("12.345.678/0001-90"));
    assert_eq!(nota["total_itens"], json!(2));
    assert_eq!(nota["valor_total"], json!(57.8));
    assert_eq!(nota["quantidade_cupons"], json!(1));
    assert_eq!(nota["chave_nota_fiscal"], json!("43230512345678000190"));
    assert_eq!(nota["data_emissao"], json!("2023-05-10"));

    let items = nota["produtos"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["nm_produto"], json!("ARROZ 5KG"));
    assert_eq!(items[0]["cod_produtos"], json!("7891000100103"));
    assert_eq!(items[0]["qnt_produtos"], json!(2.0));
    assert_eq!(items[1]["nm_produto"], json!("CAFE 500G"));
    assert_eq!(items[1]["unidade_medida_produtos"], json!("PC"));
    assert_eq!(items[1]["vl_produtos"], json!(8.0));

    assert_eq!(renderer.opened.load(Ordering::SeqCst), 1);
    assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn source_banner_goes_only_to_cannot_recover() {
    let pool = setup_pool().await;
    let renderer = ScriptedRenderer::new(Script::valid_receipt().banner("tente novamente mais tarde"));
    let consumer = consumer_with(Arc::new(SqliteBroker::new(pool.clone())), renderer.clone());

    db::enqueue(&pool, INBOUND, br#"{"chave":"ABC123","user":"u1","cpf":"123"}"#)
        .await
        .unwrap();

    let route = consumer.process_next().await.unwrap();
    assert_eq!(route, Some(Route::CannotRecover));
    assert_eq!(outbound_counts(&pool).await, [0, 0, 1, 0]);
    assert_eq!(db::count_pending(&pool, INBOUND).await.unwrap(), 0);

    let failure: FailureMessage =
        serde_json::from_value(bodies(&pool, CANNOT_RECOVER).await[0].clone()).unwrap();
    assert_eq!(failure.pattern, "error_consultar_nfe");
    assert_eq!(failure.user, json!("u1"));
    assert_eq!(failure.cpf, json!("123"));
    assert_eq!(failure.chave, json!("ABC123"));
    assert_eq!(failure.error, "source_reported");
    assert_eq!(failure.message, "tente novamente mais tarde");

    // no data region is read once the banner is seen
    assert_eq!(renderer.reads(), vec![ERROR_BANNER.to_string()]);
    assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn destroyed_context_goes_to_execution_destroyed_and_releases_page() {
    let pool = setup_pool().await;
    let script = Script {
        destroyed_on: Some(Region::ItemName.selector().to_string()),
        ..Script::valid_receipt()
    };
    let renderer = ScriptedRenderer::new(script);
    let consumer = consumer_with(Arc::new(SqliteBroker::new(pool.clone())), renderer.clone());

    db::enqueue(&pool, INBOUND, br#"{"chave":"K","user":1,"cpf":2}"#)
        .await
        .unwrap();

    assert_eq!(
        consumer.process_next().await.unwrap(),
        Some(Route::ExecutionDestroyed)
    );
    assert_eq!(outbound_counts(&pool).await, [0, 1, 0, 0]);
    assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn parse_failure_and_navigation_timeout_are_dead_lettered() {
    let pool = setup_pool().await;
    let broken = Script::valid_receipt().region(Region::TotalRow, &["Valor a pagar R$:\n--"]);
    let consumer = consumer_with(
        Arc::new(SqliteBroker::new(pool.clone())),
        ScriptedRenderer::new(broken),
    );
    db::enqueue(&pool, INBOUND, br#"{"chave":"K1"}"#).await.unwrap();
    assert_eq!(consumer.process_next().await.unwrap(), Some(Route::DeadLetter));

    let slow = Script {
        navigation_timeout: true,
        ..Script::valid_receipt()
    };
    let renderer = ScriptedRenderer::new(slow);
    let consumer = consumer_with(Arc::new(SqliteBroker::new(pool.clone())), renderer.clone());
    db::enqueue(&pool, INBOUND, br#"{"chave":"K2"}"#).await.unwrap();
    assert_eq!(consumer.process_next().await.unwrap(), Some(Route::DeadLetter));
    assert_eq!(renderer.closed.load(Ordering::SeqCst), 1);
    assert!(renderer.reads().is_empty());

    let dead = bodies(&pool, DEAD_LETTER).await;
    assert_eq!(dead.len(), 2);
    assert_eq!(dead[0]["error"], json!("parse"));
    assert_eq!(dead[0]["chave"], json!("K1"));
    assert_eq!(dead[1]["error"], json!("navigation"));
    assert!(dead[1]["message"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn undecodable_payload_is_dead_lettered_and_acked() {
    let pool = setup_pool().await;
    let renderer = ScriptedRenderer::new(Script::valid_receipt());
    let consumer = consumer_with(Arc::new(SqliteBroker::new(pool.clone())), renderer.clone());

    db::enqueue(&pool, INBOUND, br#"{"user":"u9","cpf":"999"}"#)
        .await
        .unwrap();
    db::enqueue(&pool, INBOUND, b"\x00 not json").await.unwrap();

    assert_eq!(consumer.process_next().await.unwrap(), Some(Route::DeadLetter));
    assert_eq!(consumer.process_next().await.unwrap(), Some(Route::DeadLetter));
    assert_eq!(consumer.process_next().await.unwrap(), None);

    let dead = bodies(&pool, DEAD_LETTER).await;
    assert_eq!(dead[0]["user"], json!("u9"));
    assert_eq!(dead[0]["chave"], Value::Null);
    assert_eq!(dead[0]["error"], json!("malformed_request"));
    assert_eq!(dead[1]["user"], Value::Null);
    assert_eq!(db::count_pending(&pool, INBOUND).await.unwrap(), 0);
    assert_eq!(renderer.opened.load(Ordering::SeqCst), 0);
}

/// Broker double counting publishes and acks, optionally refusing one queue.
#[derive(Clone, Default)]
struct RecordingBroker {
    inbox: Arc<Mutex<Vec<Delivery>>>,
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    acks: Arc<Mutex<Vec<i64>>>,
    refuse: Option<String>,
}

impl RecordingBroker {
    fn with_body(body: &[u8]) -> Self {
        let broker = Self::default();
        broker.inbox.lock().unwrap().push(Delivery {
            id: 1,
            message_id: "m-1".into(),
            queue: INBOUND.into(),
            body: body.to_vec(),
        });
        broker
    }

    fn published_queues(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(q, _)| q.clone())
            .collect()
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn next_delivery(&self, _queue: &str) -> Result<Option<Delivery>> {
        Ok(self.inbox.lock().unwrap().pop())
    }

    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        if self.refuse.as_deref() == Some(queue) {
            return Err(anyhow!("channel closed"));
        }
        self.published
            .lock()
            .unwrap()
            .push((queue.to_string(), body.to_vec()));
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.acks.lock().unwrap().push(delivery.id);
        Ok(())
    }
}

#[tokio::test]
async fn every_outcome_publishes_once_and_acks_once() {
    let request = br#"{"chave":"ABC123","user":"u1","cpf":"123"}"#.as_slice();
    let cases: Vec<(Script, &[u8], Route, &str)> = vec![
        (Script::valid_receipt(), request, Route::Success, PRODUCER),
        (
            Script {
                destroyed_on: Some(Region::Merchant.selector().to_string()),
                ..Script::valid_receipt()
            },
            request,
            Route::ExecutionDestroyed,
            EXECUTION_DESTROYED,
        ),
        (
            Script::valid_receipt().banner("Não foi possível recuperar a NFC-e"),
            request,
            Route::CannotRecover,
            CANNOT_RECOVER,
        ),
        (
            Script::valid_receipt().banner("Chave de acesso inválida"),
            request,
            Route::DeadLetter,
            DEAD_LETTER,
        ),
        (Script::valid_receipt(), b"[1,2".as_slice(), Route::DeadLetter, DEAD_LETTER),
    ];

    for (script, body, expected, queue) in cases {
        let broker = RecordingBroker::with_body(body);
        let consumer = consumer_with(Arc::new(broker.clone()), ScriptedRenderer::new(script));
        let route = consumer.process_next().await.unwrap();
        assert_eq!(route, Some(expected));
        assert_eq!(broker.published_queues(), vec![queue.to_string()], "{:?}", expected);
        assert_eq!(*broker.acks.lock().unwrap(), vec![1], "{:?}", expected);
    }
}

#[tokio::test]
async fn failed_success_publish_falls_back_to_dead_letter() {
    let broker = RecordingBroker {
        refuse: Some(PRODUCER.to_string()),
        ..RecordingBroker::with_body(br#"{"chave":"ABC123","user":"u1","cpf":"123"}"#)
    };
    let consumer = consumer_with(
        Arc::new(broker.clone()),
        ScriptedRenderer::new(Script::valid_receipt()),
    );

    assert_eq!(consumer.process_next().await.unwrap(), Some(Route::DeadLetter));
    assert_eq!(broker.published_queues(), vec![DEAD_LETTER.to_string()]);
    assert_eq!(*broker.acks.lock().unwrap(), vec![1]);

    let published = broker.published.lock().unwrap();
    let failure: FailureMessage = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(failure.error, "publish");
    assert!(failure.message.contains("channel closed"));
}

#[tokio::test]
async fn crawl_reports_missing_date_instead_of_waiting() {
    let script = Script::valid_receipt().region(Region::EmissionInfo, &["Emissão: hoje"]);
    let crawler = ReceiptCrawler::new(Arc::new(ScriptedRenderer::new(script)), settings());
    let err = crawler.crawl("K").await.unwrap_err();
    assert!(matches!(err, CrawlError::Parse(ParseError::NoDateFound(_))));
}

#[tokio::test]
async fn unpublishable_failure_leaves_delivery_unacked() {
    let broken = Script::valid_receipt().region(Region::TotalRow, &["Valor a pagar R$:\n--"]);
    let broker = RecordingBroker {
        refuse: Some(DEAD_LETTER.to_string()),
        ..RecordingBroker::with_body(br#"{"chave":"K1","user":"u1","cpf":"123"}"#)
    };
    let consumer = consumer_with(Arc::new(broker.clone()), ScriptedRenderer::new(broken));

    let err = consumer.process_next().await.unwrap_err();
    assert!(format!("{err:#}").contains(DEAD_LETTER));
    assert!(broker.published_queues().is_empty());
    assert!(broker.acks.lock().unwrap().is_empty());

    // an undecodable body is held back the same way
    let broker = RecordingBroker {
        refuse: Some(DEAD_LETTER.to_string()),
        ..RecordingBroker::with_body(b"{oops")
    };
    let consumer = consumer_with(
        Arc::new(broker.clone()),
        ScriptedRenderer::new(Script::valid_receipt()),
    );
    assert!(consumer.process_next().await.is_err());
    assert!(broker.acks.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unacked_delivery_is_redelivered_after_release() {
    let pool = setup_pool().await;
    db::enqueue(&pool, INBOUND, br#"{"chave":"K1"}"#).await.unwrap();
    let first = db::claim_next(&pool, INBOUND).await.unwrap().unwrap();
    assert!(db::claim_next(&pool, INBOUND).await.unwrap().is_none());

    assert_eq!(db::release_unacked(&pool, INBOUND).await.unwrap(), 1);
    let consumer = consumer_with(
        Arc::new(SqliteBroker::new(pool.clone())),
        ScriptedRenderer::new(Script::valid_receipt()),
    );
    assert_eq!(consumer.process_next().await.unwrap(), Some(Route::Success));
    assert!(db::claim_next(&pool, INBOUND).await.unwrap().is_none());
    let sent = bodies(&pool, PRODUCER).await;
    assert_eq!(sent.len(), 1);
    assert_eq!(first.queue, INBOUND);
}

#[tokio::test]
async fn page_and_request_text_never_pick_the_route() {
    let request = br#"{"chave":"naorecuperar","user":"u1","cpf":"123"}"#.as_slice();
    let cases: Vec<(Script, &[u8])> = vec![
        (Script::valid_receipt().region(Region::Totals, &["Execution"]), request),
        (
            Script::valid_receipt().region(Region::EmissionInfo, &["tente novamente destroyed"]),
            request,
        ),
        (
            Script {
                navigation_timeout: true,
                ..Script::valid_receipt()
            },
            request,
        ),
        (
            Script::valid_receipt(),
            br#"{"pattern":"Execution destroyed","data":{"chave":"K"}}"#.as_slice(),
        ),
    ];

    for (script, body) in cases {
        let broker = RecordingBroker::with_body(body);
        let consumer = consumer_with(Arc::new(broker.clone()), ScriptedRenderer::new(script));
        assert_eq!(consumer.process_next().await.unwrap(), Some(Route::DeadLetter));
        assert_eq!(broker.published_queues(), vec![DEAD_LETTER.to_string()]);
        assert_eq!(*broker.acks.lock().unwrap(), vec![1]);
    }
}
