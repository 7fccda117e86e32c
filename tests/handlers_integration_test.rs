//! Integration tests for the Telegram handlers.
//!
//! Drives the real dispatcher schema with a mocked Bot API, so the full
//! command routing, dialogue transitions, and database writes are
//! exercised without touching Telegram. The rate cache is primed from a
//! canned feed document; the mailer runs in no-op mode, so verification
//! codes are read back from the database.

use std::sync::Arc;
use std::time::Duration;

use serial_test::serial;
use teloxide::types::UserId;
use teloxide_tests::{MockBot, MockMessageText};

use kursobot::core::rate_limiter::RateLimiter;
use kursobot::email::Mailer;
use kursobot::rates::feed::parse_rate_table;
use kursobot::rates::RateCache;
use kursobot::storage::{create_pool, db, get_connection, DbPool};
use kursobot::telegram::{schema, DialogueState, DialogueStore, HandlerDeps};

const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ValCurs Date="02.03.2026" name="Foreign Currency Market">
  <Valute ID="R01235">
    <NumCode>840</NumCode>
    <CharCode>USD</CharCode>
    <Nominal>1</Nominal>
    <Name>Доллар США</Name>
    <Value>90,50</Value>
  </Valute>
  <Valute ID="R01239">
    <NumCode>978</NumCode>
    <CharCode>EUR</CharCode>
    <Nominal>1</Nominal>
    <Name>Евро</Name>
    <Value>98,00</Value>
  </Valute>
</ValCurs>"#;

struct TestDeps {
    _dir: tempfile::TempDir,
    db_pool: Arc<DbPool>,
    dialogues: Arc<DialogueStore>,
    deps: HandlerDeps,
}

async fn create_test_deps() -> TestDeps {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.sqlite");
    let db_pool = Arc::new(create_pool(path.to_str().unwrap()).unwrap());

    let rates = Arc::new(RateCache::with_ttl(
        "http://127.0.0.1:1/unused",
        Duration::from_secs(3600),
    ));
    rates.prime(parse_rate_table(FEED).unwrap()).await;

    let dialogues = Arc::new(DialogueStore::new());

    let deps = HandlerDeps {
        db_pool: Arc::clone(&db_pool),
        rates,
        rate_limiter: Arc::new(RateLimiter::new()),
        mailer: Mailer::from_config().unwrap(),
        dialogues: Arc::clone(&dialogues),
        bot_username: Some("test_bot".to_string()),
        bot_id: UserId(123456789),
    };

    TestDeps {
        _dir: dir,
        db_pool,
        dialogues,
        deps,
    }
}

fn pending_code(db_pool: &Arc<DbPool>, user_id: i64) -> String {
    let conn = get_connection(db_pool).unwrap();
    conn.query_row(
        "SELECT code FROM verification_codes WHERE user_id = ?1",
        [user_id],
        |row| row.get(0),
    )
    .unwrap()
}

#[tokio::test]
#[serial]
async fn test_command_aborts_pending_dialogue() {
    let t = create_test_deps().await;

    // /register puts the chat mid-dialogue; /rates must abort it
    let mut bot = MockBot::new(
        vec![
            MockMessageText::new().text("/register"),
            MockMessageText::new().text("/rates"),
        ],
        schema(t.deps),
    );
    bot.dispatch().await;

    let responses = bot.get_responses();
    let sent = &responses.sent_messages;
    assert_eq!(sent.len(), 2);
    assert!(sent[0].text().unwrap().contains("email"));
    assert!(sent[1].text().unwrap().contains("Курсы валют"));

    let chat_id = sent[0].chat.id;
    assert_eq!(t.dialogues.get(chat_id), DialogueState::Idle);
}

#[tokio::test]
#[serial]
async fn test_register_reprompts_on_malformed_email() {
    let t = create_test_deps().await;

    let mut bot = MockBot::new(
        vec![
            MockMessageText::new().text("/register"),
            MockMessageText::new().text("это не почта"),
        ],
        schema(t.deps),
    );
    bot.dispatch().await;

    let responses = bot.get_responses();
    let sent = &responses.sent_messages;
    assert!(sent.last().unwrap().text().unwrap().contains("не похоже"));

    // The chat stays on the email step instead of falling back to Idle
    let chat_id = sent[0].chat.id;
    assert_eq!(t.dialogues.get(chat_id), DialogueState::RegisterAwaitingEmail);
}

#[tokio::test]
#[serial]
async fn test_register_flow_verifies_email() {
    let t = create_test_deps().await;
    let dialogues = Arc::clone(&t.dialogues);
    let db_pool = Arc::clone(&t.db_pool);

    let mut bot = MockBot::new(
        vec![
            MockMessageText::new().text("/register"),
            MockMessageText::new().text("alice@example.com"),
        ],
        schema(t.deps),
    );
    bot.dispatch().await;

    let responses = bot.get_responses();
    let sent = &responses.sent_messages;
    assert!(sent.last().unwrap().text().unwrap().contains("Отправил код"));

    let chat_id = sent[0].chat.id;
    assert_eq!(
        dialogues.get(chat_id),
        DialogueState::RegisterAwaitingCode {
            email: "alice@example.com".to_string()
        }
    );

    // Submit the code that landed in the database (no-op mailer)
    let code = pending_code(&db_pool, chat_id.0);
    bot.update(MockMessageText::new().text(code));
    bot.dispatch().await;

    let responses = bot.get_responses();
    assert!(responses
        .sent_messages
        .last()
        .unwrap()
        .text()
        .unwrap()
        .contains("подтверждён"));
    assert_eq!(dialogues.get(chat_id), DialogueState::Idle);

    let conn = get_connection(&db_pool).unwrap();
    let user = db::get_user(&conn, chat_id.0).unwrap().unwrap();
    assert!(user.is_verified());
}

#[tokio::test]
#[serial]
async fn test_wrong_code_keeps_chat_on_code_step() {
    let t = create_test_deps().await;
    let dialogues = Arc::clone(&t.dialogues);

    let mut bot = MockBot::new(
        vec![
            MockMessageText::new().text("/register"),
            MockMessageText::new().text("bob@example.com"),
            MockMessageText::new().text("000000"),
        ],
        schema(t.deps),
    );
    bot.dispatch().await;

    let responses = bot.get_responses();
    let sent = &responses.sent_messages;
    let reply = sent.last().unwrap().text().unwrap();
    // The real code is random; a collision with 000000 is one in 900000
    assert!(reply.contains("Неверный код"), "unexpected reply: {}", reply);

    let chat_id = sent[0].chat.id;
    assert_eq!(
        dialogues.get(chat_id),
        DialogueState::RegisterAwaitingCode {
            email: "bob@example.com".to_string()
        }
    );
}

#[tokio::test]
#[serial]
async fn test_convert_dialogue_end_to_end() {
    let t = create_test_deps().await;
    let dialogues = Arc::clone(&t.dialogues);
    let db_pool = Arc::clone(&t.db_pool);

    // Learn the mock chat id, then verify the user directly in the store
    let mut bot = MockBot::new(MockMessageText::new().text("/start"), schema(t.deps));
    bot.dispatch().await;
    let chat_id = bot.get_responses().sent_messages[0].chat.id;
    {
        let conn = get_connection(&db_pool).unwrap();
        db::set_user_email(&conn, chat_id.0, "carol@example.com").unwrap();
        db::mark_email_verified(&conn, chat_id.0).unwrap();
    }

    bot.update(MockMessageText::new().text("/convert"));
    bot.dispatch().await;
    assert_eq!(dialogues.get(chat_id), DialogueState::ConvertAwaitingSource);

    // Unknown source currency re-prompts without losing the step
    bot.update(MockMessageText::new().text("XYZ"));
    bot.dispatch().await;
    assert!(bot
        .get_responses()
        .sent_messages
        .last()
        .unwrap()
        .text()
        .unwrap()
        .contains("Не знаю валюту"));
    assert_eq!(dialogues.get(chat_id), DialogueState::ConvertAwaitingSource);

    bot.update(MockMessageText::new().text("usd"));
    bot.dispatch().await;
    assert_eq!(
        dialogues.get(chat_id),
        DialogueState::ConvertAwaitingTarget {
            from: "USD".to_string()
        }
    );

    bot.update(MockMessageText::new().text("rub"));
    bot.dispatch().await;
    bot.update(MockMessageText::new().text("100"));
    bot.dispatch().await;

    let responses = bot.get_responses();
    let reply = responses.sent_messages.last().unwrap().text().unwrap();
    assert!(reply.contains("Итого"), "unexpected reply: {}", reply);
    assert_eq!(dialogues.get(chat_id), DialogueState::Idle);

    let conn = get_connection(&db_pool).unwrap();
    let history = db::get_conversion_history(&conn, chat_id.0, 10, 0).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_code, "USD");
    assert_eq!(history[0].to_code, "RUB");
}

#[tokio::test]
#[serial]
async fn test_one_shot_conversion_requires_verified_email() {
    let t = create_test_deps().await;

    let mut bot = MockBot::new(MockMessageText::new().text("USD RUB 100"), schema(t.deps));
    bot.dispatch().await;

    let responses = bot.get_responses();
    let reply = responses.sent_messages.last().unwrap().text().unwrap();
    assert!(reply.contains("/register"), "unexpected reply: {}", reply);
}
