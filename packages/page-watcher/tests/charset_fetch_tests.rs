//! Pages fetched over a real socket whose charset is not UTF-8.

use encoding_rs::WINDOWS_1251;
use url::Url;
use watcher_core::testing::{StubResponse, StubServer};
use watcher_core::{Extractor, HttpTransport, ReqwestTransport, SelectionRule, Target};

fn cp1251_page(title: &str) -> Vec<u8> {
    let html = format!(
        r#"<html><head><meta charset="windows-1251"></head><body><p id="s">{title}</p></body></html>"#
    );
    WINDOWS_1251.encode(&html).0.into_owned()
}

async fn fetch_text(server: &StubServer) -> String {
    let transport = ReqwestTransport::new().unwrap();
    let target = Target::new(Url::parse(&server.url("/afisha")).unwrap());
    transport.get(&target).await.unwrap().body
}

#[tokio::test]
async fn meta_declared_windows_1251_is_decoded() {
    let server = StubServer::start(
        StubResponse::new(200, cp1251_page("Щелкунчик")).with_header("Content-Type", "text/html"),
    )
    .await
    .unwrap();

    let body = fetch_text(&server).await;

    assert!(body.contains("Щелкунчик"));
    assert!(!body.contains('\u{FFFD}'));
}

#[tokio::test]
async fn cyrillic_only_edits_change_the_signature() {
    let extractor = Extractor::new(SelectionRule::text_of("#s")).unwrap();
    let mut hashes = Vec::new();
    for title in ["Щелкунчик", "Лебединое озеро"] {
        let server = StubServer::start(
            StubResponse::new(200, cp1251_page(title)).with_header("Content-Type", "text/html"),
        )
        .await
        .unwrap();
        let body = fetch_text(&server).await;
        hashes.push(extractor.extract(&body).unwrap().hash);
    }

    assert_ne!(hashes[0], hashes[1]);
}
