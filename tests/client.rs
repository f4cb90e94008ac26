use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{StatusCode, Version};
use parking_lot::Mutex;

use parley::client::{
    Client, Connection, Content, Error, Exchange, Listeners, Outcome, Receiver, Request,
    ResponseListener, Sender,
};

/// Records requests and leaves completion to the test.
#[derive(Debug, Default)]
struct Recording {
    sent: Mutex<Vec<Request>>,
    aborted: AtomicUsize,
}

impl Sender for Recording {
    fn send(&self, exchange: Arc<Exchange>) {
        self.sent.lock().push(exchange.request().clone());
    }

    fn abort(&self, exchange: &Arc<Exchange>, cause: &Error) -> bool {
        self.aborted.fetch_add(1, Ordering::SeqCst);
        let aborted = exchange.request_failed(cause.clone());
        exchange.terminate_request();
        aborted
    }
}

/// Answers every receive with a `200 OK`.
#[derive(Debug, Default)]
struct Ok200;

impl Receiver for Ok200 {
    fn receive(&self, exchange: Arc<Exchange>) {
        exchange.response().set_status(StatusCode::OK);
        exchange.response_headers();
        exchange.response_succeeded();
        exchange.terminate_response();
    }
}

#[derive(Debug, Default)]
struct CountOutcomes {
    outcomes: AtomicUsize,
}

impl ResponseListener for CountOutcomes {
    fn on_complete(&self, _outcome: &Outcome) {
        self.outcomes.fetch_add(1, Ordering::SeqCst);
    }
}

fn connection(client: &Client) -> (Connection, Arc<Recording>) {
    let sender = Arc::new(Recording::default());
    let connection = client.connect(sender.clone(), Arc::new(Ok200));
    (connection, sender)
}

fn request(path: &str) -> Request {
    format!("http://example.com{path}").parse().unwrap()
}

#[test]
fn concurrent_sends_bind_once() {
    let _ = tracing_subscriber::fmt::try_init();
    let client = Client::default();

    for _ in 0..64 {
        let (connection, sender) = connection(&client);

        let results = std::thread::scope(|scope| {
            let first = scope.spawn(|| connection.send(request("/a"), Listeners::new()));
            let second = scope.spawn(|| connection.send(request("/b"), Listeners::new()));
            [first.join().unwrap(), second.join().unwrap()]
        });

        let bound = results.iter().filter(|result| result.is_ok()).count();
        let refused = results
            .iter()
            .filter(|result| matches!(result, Err(Error::Pipelining)))
            .count();
        assert_eq!((bound, refused), (1, 1));
        assert_eq!(sender.sent.lock().len(), 1);
    }

    // Only the bound exchanges' conversations are still open.
    assert_eq!(client.conversations(), 64);
}

#[test]
fn send_normalizes_request() {
    let client = Client::builder().without_user_agent().build();
    let (connection, sender) = connection(&client);

    let mut request = request("/");
    request
        .set_path("")
        .set_version(Version::HTTP_11)
        .set_content(Bytes::from_static(b"0123456789"));
    connection.send(request, Listeners::new()).unwrap();

    let sent = sender.sent.lock();
    let sent = &sent[0];
    assert_eq!(sent.path(), "/");
    assert_eq!(sent.headers().get(CONTENT_LENGTH).unwrap(), "10");
    assert_eq!(sent.headers().get(HOST).unwrap(), "example.com:80");
    assert_eq!(sent.headers().len(), 2);
}

#[test]
fn unknown_length_is_chunked() {
    let client = Client::default();
    let (connection, sender) = connection(&client);

    let mut request = request("/upload");
    request.set_content(Content::Chunked(vec![Bytes::from_static(b"part")]));
    connection.send(request, Listeners::new()).unwrap();

    let sent = sender.sent.lock();
    assert_eq!(sent[0].headers().get(TRANSFER_ENCODING).unwrap(), "chunked");
    assert!(sent[0].headers().get(CONTENT_LENGTH).is_none());
}

#[test]
fn exchange_lifecycle_frees_connection() {
    let client = Client::default();
    let (connection, _) = connection(&client);
    let counter = Arc::new(CountOutcomes::default());

    let exchange = connection
        .send(
            request("/"),
            Listeners::from(counter.clone() as Arc<dyn ResponseListener>),
        )
        .unwrap();
    assert!(exchange.request_succeeded());
    exchange.terminate_request();

    connection.on_fillable().unwrap();
    assert!(exchange.is_complete());
    assert!(exchange.is_succeeded());
    assert!(exchange.is_terminated());
    assert_eq!(counter.outcomes.load(Ordering::SeqCst), 1);

    assert!(connection.exchange().is_none());
    assert!(matches!(connection.on_fillable(), Err(Error::NoExchange)));
    assert_eq!(client.conversations(), 0);
}

#[test]
fn abort_while_queued() {
    let client = Client::default();
    let exchange = client.submit(request("/queued"), Listeners::new());
    let destination = client.destination_for(&exchange.request().into());
    assert_eq!(destination.queued(), 1);

    assert!(exchange.abort(Error::aborted("queued")));
    assert_eq!(destination.queued(), 0);
    assert!(exchange.is_complete());
    assert!(exchange.request_failure().unwrap().is_aborted());
    assert!(exchange.response_failure().unwrap().is_aborted());
}

#[test]
fn abort_while_bound_delegates_to_connection() {
    let client = Client::default();
    let (connection, sender) = connection(&client);

    let exchange = connection.send(request("/"), Listeners::new()).unwrap();
    assert!(exchange.abort(Error::aborted("bound")));

    assert_eq!(sender.aborted.load(Ordering::SeqCst), 1);
    assert!(exchange.is_complete());
    assert!(connection.exchange().is_none());
}

#[test]
fn abort_after_completion_is_too_late() {
    let client = Client::default();
    let (connection, _) = connection(&client);

    let exchange = connection.send(request("/"), Listeners::new()).unwrap();
    exchange.request_succeeded();
    connection.on_fillable().unwrap();
    assert!(exchange.is_succeeded());

    assert!(!exchange.abort(Error::aborted("late")));
    assert!(exchange.request_failure().is_none());
    assert!(exchange.response_failure().is_none());
}

#[test]
fn reset_response_round_trip() {
    let client = Client::default();
    let (connection, _) = connection(&client);

    let exchange = connection.send(request("/auth"), Listeners::new()).unwrap();

    let first = exchange.response_complete(None);
    assert!(first.modified);
    assert!(first.outcome.is_none());
    assert!(exchange.reset_response(true));

    let request = exchange.request_complete(None);
    assert!(request.modified);
    assert!(request.outcome.is_none());
    assert!(!exchange.is_complete());

    let second = exchange.response_complete(Some(Error::IdleTimeout));
    assert!(second.modified);
    let outcome = second.outcome.unwrap();
    assert!(matches!(outcome.response_failure(), Some(Error::IdleTimeout)));
    assert!(outcome.request_failure().is_none());
}

#[test]
fn one_outcome_under_racing_abort() {
    let client = Client::default();

    for _ in 0..64 {
        let (connection, _) = connection(&client);
        let counter = Arc::new(CountOutcomes::default());
        let exchange = connection
            .send(
                request("/"),
                Listeners::from(counter.clone() as Arc<dyn ResponseListener>),
            )
            .unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| exchange.request_succeeded());
            scope.spawn(|| connection.on_fillable().is_ok());
            scope.spawn(|| exchange.abort(Error::aborted("race")));
        });

        assert!(exchange.is_complete());
        assert_eq!(counter.outcomes.load(Ordering::SeqCst), 1);
    }
}

#[test]
fn termination_barrier_releases_waiter() {
    let client = Client::default();
    let (connection, _) = connection(&client);
    let exchange = connection.send(request("/"), Listeners::new()).unwrap();

    let waiter = {
        let exchange = exchange.clone();
        std::thread::spawn(move || exchange.await_termination_timeout(Duration::from_secs(5)))
    };

    std::thread::scope(|scope| {
        scope.spawn(|| {
            exchange.request_succeeded();
            exchange.terminate_request();
        });
        scope.spawn(|| connection.on_fillable().unwrap());
    });

    assert!(waiter.join().unwrap());
    exchange.terminate_request();
    exchange.terminate_response();
    exchange.await_termination();
}

#[tokio::test]
async fn send_resolves_from_another_task() {
    let client = Client::default();
    let request = request("/async");
    let sender = Arc::new(Recording::default());
    let connection = client.connect_to(&(&request).into(), sender.clone(), Arc::new(Ok200));

    let future = client.send(request);

    let driver = tokio::spawn(async move {
        let exchange = connection.exchange().expect("bound exchange");
        exchange.request_succeeded();
        exchange.terminate_request();
        connection.on_fillable()
    });

    let outcome = future.await.unwrap();
    driver.await.unwrap().unwrap();

    assert!(outcome.is_succeeded());
    assert_eq!(outcome.request().path(), "/async");
    assert_eq!(sender.sent.lock().len(), 1);
}
