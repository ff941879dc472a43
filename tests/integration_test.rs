//! Integration tests for view-kit
//!
//! These tests verify end-to-end view behavior across all components: tiers,
//! own-fields caching, save-time invalidation, and both reference paths.

use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use view_kit::backend::{CacheBackend, InMemoryBackend};
use view_kit::entity::Record;
use view_kit::schema::FieldDecl;
use view_kit::store::{Association, InMemoryEntityStore};
use view_kit::{
    EntityStore, EntityTypeDef, Error, FieldDef, Related, ViewConfig, ViewEngine, ViewOptions,
    ViewService,
};

type Engine = ViewEngine<InMemoryBackend, InMemoryEntityStore>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn engine_with(store: &InMemoryEntityStore, config: ViewConfig<InMemoryBackend>) -> Engine {
    init_logging();
    ViewEngine::new(config, store.clone())
}

/// View a committed entity at the top level.
async fn view_of(
    engine: &Engine,
    store: &InMemoryEntityStore,
    entity_type: &str,
    id: &str,
    tier: &str,
) -> Value {
    view_record(engine, entity_record(entity_type, id, store), tier).await
}

fn entity_record(entity_type: &str, id: &str, store: &InMemoryEntityStore) -> Record {
    store.get(entity_type, id).expect("Entity should exist")
}

/// View an in-hand record, which may carry uncommitted changes.
async fn view_record(engine: &Engine, record: Record, tier: &str) -> Value {
    let view = engine
        .view(&record.into_ref(), &ViewOptions::new(tier))
        .await
        .expect("View should succeed")
        .expect("Top-level view is never hidden");
    Value::Object(view)
}

// ============================================================================
// Fixtures
// ============================================================================

fn foobar_def(computed_calls: Arc<AtomicUsize>) -> EntityTypeDef {
    EntityTypeDef::new("foobar")
        .field(FieldDef::new("foo"))
        .field(FieldDef::new("baz").properties("public"))
        .field(FieldDef::new("bar").properties("all"))
        .field(
            FieldDef::new("renamed_baz")
                .source("baz")
                .properties("all"),
        )
        .field(
            FieldDef::computed("computed", move |e| {
                computed_calls.fetch_add(1, Ordering::SeqCst);
                json!(format!(
                    "{}{}",
                    e.attribute("foo").as_str().unwrap_or_default(),
                    e.attribute("bar").as_str().unwrap_or_default()
                ))
            })
            .properties("all"),
        )
}

fn foobar_record() -> Record {
    Record::new("foobar", "1")
        .with("foo", json!("FOO"))
        .with("baz", json!("BAZ"))
        .with("bar", json!("BAR"))
}

/// Manager has many employees; the association is not reflectable, so it
/// resolves through the slow path.
async fn manager_fixture(engine: &mut Engine, store: &InMemoryEntityStore) {
    store.define_association("manager", "employees", Association::has_many("employee", "manager_id"));
    engine
        .register(
            EntityTypeDef::new("manager")
                .field(FieldDef::new("name"))
                .field(FieldDef::new("ssn").properties("all"))
                .field(FieldDef::reference("employees")),
        )
        .expect("Failed to register manager");
    engine
        .register(
            EntityTypeDef::new("employee")
                .field(FieldDef::new("name"))
                .field(FieldDef::new("nickname").properties("all")),
        )
        .expect("Failed to register employee");
}

fn employee(id: &str, name: &str, nickname: &str) -> Record {
    Record::new("employee", id)
        .with("name", json!(name))
        .with("nickname", json!(nickname))
        .with("manager_id", json!("m1"))
}

/// Artwork has one image (slow path).
async fn artwork_fixture(engine: &mut Engine, store: &InMemoryEntityStore) {
    store.define_association("artwork", "image", Association::has_one("image", "artwork_id"));
    engine
        .register(
            EntityTypeDef::new("artwork")
                .field(FieldDef::new("name"))
                .field(FieldDef::reference("image")),
        )
        .expect("Failed to register artwork");
    engine
        .register(
            EntityTypeDef::new("image")
                .field(FieldDef::new("name"))
                .field(FieldDef::new("nickname"))
                .field(FieldDef::new("url").properties("public")),
        )
        .expect("Failed to register image");

    store
        .save(Record::new("artwork", "a1").with("name", json!("Mona Lisa")))
        .await
        .expect("Failed to save artwork");
    store
        .save(
            Record::new("image", "i1")
                .with("name", json!("Picture of Mona Lisa"))
                .with("nickname", json!("Mona"))
                .with("url", json!("http://example.com/404.html"))
                .with("artwork_id", json!("a1")),
        )
        .await
        .expect("Failed to save image");
}

/// Artwork belongs to an image, which holds a list of url ids (fast path all
/// the way down).
async fn hierarchy_fixture(engine: &mut Engine, store: &InMemoryEntityStore) {
    store.define_association("gallery_artwork", "image", Association::belongs_to("gallery_image", "image_id"));
    store.define_association("gallery_image", "urls", Association::many_to_many("gallery_url", "url_ids"));
    engine
        .register(
            EntityTypeDef::new("gallery_artwork")
                .field(FieldDef::new("name"))
                .field(FieldDef::new("display_name").properties("public"))
                .field(FieldDef::new("price").properties("all"))
                .field(FieldDef::reference("image")),
        )
        .expect("Failed to register artwork");
    engine
        .register(
            EntityTypeDef::new("gallery_image")
                .field(FieldDef::new("name"))
                .field(FieldDef::reference("urls")),
        )
        .expect("Failed to register image");
    engine
        .register(
            EntityTypeDef::new("gallery_url")
                .field(FieldDef::new("url"))
                .field(FieldDef::new("is_public").properties("all")),
        )
        .expect("Failed to register url");

    for id in ["u1", "u2", "u3"] {
        store
            .save(
                Record::new("gallery_url", id)
                    .with("url", json!("http://example.com/common.jpg"))
                    .with("is_public", json!(false)),
            )
            .await
            .expect("Failed to save url");
    }
    store
        .save(
            Record::new("gallery_image", "i1")
                .with("name", json!("Image"))
                .with("url_ids", json!(["u1", "u2", "u3"])),
        )
        .await
        .expect("Failed to save image");
    store
        .save(
            Record::new("gallery_artwork", "a1")
                .with("name", json!("Artwork"))
                .with("display_name", json!("Awesome Artwork"))
                .with("price", json!(1000))
                .with("image_id", json!("i1")),
        )
        .await
        .expect("Failed to save artwork");
}

fn secret_def() -> EntityTypeDef {
    EntityTypeDef::new("secret")
        .field(FieldDef::new("secret"))
        .hide_as_child_when(|e| e.attribute("should_tell_secret") != json!(true))
}

fn secret(id: &str, tell: bool) -> Record {
    Record::new("secret", id)
        .with("secret", json!("Afraid of the dark"))
        .with("should_tell_secret", json!(tell))
}

// ============================================================================
// Tiers
// ============================================================================

/// Each tier is a superset of the one below it.
#[tokio::test]
async fn test_tiers_select_subsets_of_fields() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    engine
        .register(foobar_def(Arc::new(AtomicUsize::new(0))))
        .expect("Failed to register");
    store.save(foobar_record()).await.expect("Failed to save");

    assert_eq!(
        view_of(&engine, &store, "foobar", "1", "short").await,
        json!({"foo": "FOO"})
    );
    assert_eq!(
        view_of(&engine, &store, "foobar", "1", "public").await,
        json!({"foo": "FOO", "baz": "BAZ"})
    );
    assert_eq!(
        view_of(&engine, &store, "foobar", "1", "all").await,
        json!({
            "foo": "FOO",
            "baz": "BAZ",
            "bar": "BAR",
            "renamed_baz": "BAZ",
            "computed": "FOOBAR"
        })
    );
}

#[tokio::test]
async fn test_invalid_properties_are_validation_errors() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    engine
        .register(foobar_def(Arc::new(AtomicUsize::new(0))))
        .expect("Failed to register");
    let entity = foobar_record().into_ref();

    let missing = engine.view(&entity, &ViewOptions::default()).await;
    assert!(matches!(missing, Err(Error::ValidationError(_))));

    let unknown = engine.view(&entity, &ViewOptions::new("special")).await;
    assert!(matches!(unknown, Err(Error::ValidationError(_))));
}

// ============================================================================
// Caching and invalidation
// ============================================================================

/// Repeated views hit the cache and return identical values.
#[tokio::test]
async fn test_subsequent_views_hit_the_cache() {
    let store = InMemoryEntityStore::new();
    let backend = InMemoryBackend::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = engine_with(&store, ViewConfig::new(backend.clone()));
    engine
        .register(foobar_def(calls.clone()))
        .expect("Failed to register");
    store.save(foobar_record()).await.expect("Failed to save");

    let all = view_of(&engine, &store, "foobar", "1", "all").await;
    let public = view_of(&engine, &store, "foobar", "1", "public").await;
    let short = view_of(&engine, &store, "foobar", "1", "short").await;
    assert_ne!(all, public);
    assert_ne!(all, short);
    assert_ne!(public, short);

    for _ in 0..3 {
        assert_eq!(view_of(&engine, &store, "foobar", "1", "all").await, all);
        assert_eq!(view_of(&engine, &store, "foobar", "1", "public").await, public);
        assert_eq!(view_of(&engine, &store, "foobar", "1", "short").await, short);
    }

    // Only the `all` tier has the computed field, and it ran once
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        backend.keys(),
        vec![
            "as_json/foobar/1/all/true",
            "as_json/foobar/1/public/true",
            "as_json/foobar/1/short/true",
        ]
    );
}

/// Local changes are invisible until saved; saving refreshes every tier.
#[tokio::test]
async fn test_save_removes_cached_views() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    engine
        .register(foobar_def(Arc::new(AtomicUsize::new(0))))
        .expect("Failed to register");
    store.save(foobar_record()).await.expect("Failed to save");

    let all = view_of(&engine, &store, "foobar", "1", "all").await;
    let public = view_of(&engine, &store, "foobar", "1", "public").await;
    let short = view_of(&engine, &store, "foobar", "1", "short").await;

    let mut foobar = entity_record("foobar", "1", &store);
    foobar.set("foo", json!("foo"));

    // Not saved yet, so the cached views still win
    for _ in 0..3 {
        assert_eq!(view_record(&engine, foobar.clone(), "all").await, all);
        assert_eq!(view_record(&engine, foobar.clone(), "public").await, public);
        assert_eq!(view_record(&engine, foobar.clone(), "short").await, short);
    }

    store.save(foobar.clone()).await.expect("Failed to save");

    for _ in 0..3 {
        assert_eq!(
            view_record(&engine, foobar.clone(), "all").await,
            json!({
                "foo": "foo",
                "baz": "BAZ",
                "bar": "BAR",
                "renamed_baz": "BAZ",
                "computed": "fooBAR"
            })
        );
        assert_eq!(
            view_record(&engine, foobar.clone(), "public").await,
            json!({"foo": "foo", "baz": "BAZ"})
        );
        assert_eq!(
            view_record(&engine, foobar.clone(), "short").await,
            json!({"foo": "foo"})
        );
    }
}

/// A view computed while a save is in flight must not outlive the commit.
#[tokio::test]
async fn test_read_during_save_does_not_leave_stale_view() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    engine
        .register(EntityTypeDef::new("user").field(FieldDef::new("name")))
        .expect("Failed to register");
    store
        .save(Record::new("user", "1").with("name", json!("Ada")))
        .await
        .expect("Failed to save");
    let service = ViewService::new(engine);

    // Runs right after invalidation, while the old record is still committed
    let reader = service.clone();
    store.before_save(
        "user",
        Arc::new(move |_: &str, _: &str| {
            let reader = reader.clone();
            async move {
                reader
                    .view_by_id("user", "1", &ViewOptions::new("short"))
                    .await
                    .map(|_| ())
            }
            .boxed()
        }),
    );

    let mut user = store.get("user", "1").expect("Entity should exist");
    user.set("name", json!("Grace"));
    store.save(user).await.expect("Failed to save");

    let view = service
        .view_by_id("user", "1", &ViewOptions::new("short"))
        .await
        .expect("View should succeed")
        .expect("View should exist");
    assert_eq!(view.get("name"), Some(&json!("Grace")));
}

#[tokio::test]
async fn test_disabled_caching_always_recomputes() {
    let store = InMemoryEntityStore::new();
    let backend = InMemoryBackend::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut engine = engine_with(
        &store,
        ViewConfig::new(backend.clone()).with_disable_caching(true),
    );
    engine
        .register(foobar_def(calls.clone()))
        .expect("Failed to register");
    store.save(foobar_record()).await.expect("Failed to save");

    for _ in 0..3 {
        view_of(&engine, &store, "foobar", "1", "all").await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(backend.is_empty());

    // Nothing is cached, so even unsaved changes show up
    let mut foobar = entity_record("foobar", "1", &store);
    foobar.set("foo", json!("local"));
    assert_eq!(
        view_record(&engine, foobar, "short").await,
        json!({"foo": "local"})
    );
}

/// A corrupt entry left in the backend is replaced, not surfaced.
#[tokio::test]
async fn test_corrupt_cache_entry_is_recomputed() {
    let store = InMemoryEntityStore::new();
    let backend = InMemoryBackend::new();
    let mut engine = engine_with(&store, ViewConfig::new(backend.clone()));
    engine
        .register(foobar_def(Arc::new(AtomicUsize::new(0))))
        .expect("Failed to register");
    store.save(foobar_record()).await.expect("Failed to save");

    backend
        .set("as_json/foobar/1/short/true", b"garbage".to_vec(), None)
        .await
        .expect("Failed to set");

    assert_eq!(
        view_of(&engine, &store, "foobar", "1", "short").await,
        json!({"foo": "FOO"})
    );
}

// ============================================================================
// Transforms
// ============================================================================

fn sanitizing_config(backend: InMemoryBackend) -> ViewConfig<InMemoryBackend> {
    ViewConfig::new(backend).with_transform(|_name, field, value| {
        if !field.flag("markdown") {
            return value;
        }
        let text = value.as_str().unwrap_or_default();
        json!(text.replace("<strong>", "**").replace("</strong>", "**"))
    })
}

#[tokio::test]
async fn test_transforms_sanitize_flagged_fields() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, sanitizing_config(InMemoryBackend::new()));
    engine
        .register(
            EntityTypeDef::new("dirty")
                .field(FieldDef::new("dirty_foo").option("markdown", json!(true)))
                .field(FieldDef::new("ignored_foo")),
        )
        .expect("Failed to register");

    let dirty = "<strong>Content</strong>";
    let record = Record::new("dirty", "1")
        .with("dirty_foo", json!(dirty))
        .with("ignored_foo", json!(dirty));
    let view = view_record(&engine, record, "public").await;

    assert_eq!(view["dirty_foo"], json!("**Content**"));
    assert_eq!(view["ignored_foo"], json!(dirty));
}

#[tokio::test]
async fn test_transforms_handle_null_values() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, sanitizing_config(InMemoryBackend::new()));
    engine
        .register(
            EntityTypeDef::new("dirty")
                .field(FieldDef::new("dirty_foo").option("markdown", json!(true))),
        )
        .expect("Failed to register");

    let view = view_record(&engine, Record::new("dirty", "2"), "public").await;
    assert_eq!(view["dirty_foo"], json!(""));
}

// ============================================================================
// Slow path: has-many and has-one
// ============================================================================

#[tokio::test]
async fn test_has_many_passes_narrow_or_full_tier_to_children() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    manager_fixture(&mut engine, &store).await;

    store
        .save(
            Record::new("manager", "m1")
                .with("name", json!("Boss"))
                .with("ssn", json!("123-45-6789")),
        )
        .await
        .expect("Failed to save manager");
    for record in [
        employee("e1", "Peon", "My Favorite"),
        employee("e2", "Indentured servant", "My Favorite"),
        employee("e3", "Serf", "Vince"),
    ] {
        store.save(record).await.expect("Failed to save employee");
    }

    let narrow = json!({
        "name": "Boss",
        "employees": [
            {"name": "Peon"},
            {"name": "Indentured servant"},
            {"name": "Serf"}
        ]
    });

    for _ in 0..3 {
        assert_eq!(view_of(&engine, &store, "manager", "m1", "short").await, narrow);
        assert_eq!(view_of(&engine, &store, "manager", "m1", "public").await, narrow);
        assert_eq!(
            view_of(&engine, &store, "manager", "m1", "all").await,
            json!({
                "name": "Boss",
                "ssn": "123-45-6789",
                "employees": [
                    {"name": "Peon", "nickname": "My Favorite"},
                    {"name": "Indentured servant", "nickname": "My Favorite"},
                    {"name": "Serf", "nickname": "Vince"}
                ]
            })
        );
        assert_eq!(
            view_of(&engine, &store, "employee", "e1", "short").await,
            json!({"name": "Peon"})
        );
        assert_eq!(
            view_of(&engine, &store, "employee", "e1", "all").await,
            json!({"name": "Peon", "nickname": "My Favorite"})
        );
    }
}

#[tokio::test]
async fn test_has_many_updates_when_parent_or_child_changes() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    manager_fixture(&mut engine, &store).await;

    store
        .save(Record::new("manager", "m1").with("name", json!("Manager")))
        .await
        .expect("Failed to save manager");
    store
        .save(employee("e1", "Employee", "Emp"))
        .await
        .expect("Failed to save employee");

    for _ in 0..3 {
        assert_eq!(
            view_of(&engine, &store, "manager", "m1", "short").await,
            json!({"name": "Manager", "employees": [{"name": "Employee"}]})
        );
    }

    let mut manager = entity_record("manager", "m1", &store);
    manager.set("name", json!("New Manager"));
    store.save(manager).await.expect("Failed to save manager");
    for _ in 0..3 {
        assert_eq!(
            view_of(&engine, &store, "manager", "m1", "short").await,
            json!({"name": "New Manager", "employees": [{"name": "Employee"}]})
        );
    }

    let mut employee = entity_record("employee", "e1", &store);
    employee.set("name", json!("New Employee"));
    store.save(employee).await.expect("Failed to save employee");
    for _ in 0..3 {
        assert_eq!(
            view_of(&engine, &store, "manager", "m1", "short").await,
            json!({"name": "New Manager", "employees": [{"name": "New Employee"}]})
        );
    }
}

#[tokio::test]
async fn test_has_one_uses_short_for_children_below_all() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    artwork_fixture(&mut engine, &store).await;

    let narrow_image = json!({"name": "Picture of Mona Lisa", "nickname": "Mona"});
    let full_image = json!({
        "name": "Picture of Mona Lisa",
        "nickname": "Mona",
        "url": "http://example.com/404.html"
    });

    for _ in 0..3 {
        assert_eq!(
            view_of(&engine, &store, "artwork", "a1", "short").await,
            json!({"name": "Mona Lisa", "image": narrow_image})
        );
        assert_eq!(
            view_of(&engine, &store, "artwork", "a1", "public").await,
            json!({"name": "Mona Lisa", "image": narrow_image})
        );
        assert_eq!(
            view_of(&engine, &store, "artwork", "a1", "all").await,
            json!({"name": "Mona Lisa", "image": full_image})
        );
        assert_eq!(view_of(&engine, &store, "image", "i1", "short").await, narrow_image);
        assert_eq!(view_of(&engine, &store, "image", "i1", "public").await, full_image);
    }
}

/// Saving the child is enough; the parent is never re-saved.
#[tokio::test]
async fn test_has_one_updates_when_child_is_saved() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    artwork_fixture(&mut engine, &store).await;

    for tier in ["short", "public", "all"] {
        view_of(&engine, &store, "artwork", "a1", tier).await;
    }

    let image_at = |name: &str, nickname: &str, full: bool| {
        let mut image = json!({"name": name, "nickname": nickname});
        if full {
            image["url"] = json!("http://example.com/404.html");
        }
        json!({"name": "Mona Lisa", "image": image})
    };

    let mut image = entity_record("image", "i1", &store);
    image.set("nickname", json!("Worst Painting Ever"));

    // Nothing saved yet
    for _ in 0..3 {
        assert_eq!(
            view_of(&engine, &store, "artwork", "a1", "short").await,
            image_at("Picture of Mona Lisa", "Mona", false)
        );
        assert_eq!(
            view_of(&engine, &store, "artwork", "a1", "all").await,
            image_at("Picture of Mona Lisa", "Mona", true)
        );
    }

    store.save(image.clone()).await.expect("Failed to save image");
    for _ in 0..3 {
        assert_eq!(
            view_of(&engine, &store, "artwork", "a1", "short").await,
            image_at("Picture of Mona Lisa", "Worst Painting Ever", false)
        );
        assert_eq!(
            view_of(&engine, &store, "artwork", "a1", "public").await,
            image_at("Picture of Mona Lisa", "Worst Painting Ever", false)
        );
        assert_eq!(
            view_of(&engine, &store, "artwork", "a1", "all").await,
            image_at("Picture of Mona Lisa", "Worst Painting Ever", true)
        );
    }

    image.set("name", json!("Picture of Mona Lisa Watercolor"));
    for _ in 0..3 {
        assert_eq!(
            view_of(&engine, &store, "artwork", "a1", "short").await,
            image_at("Picture of Mona Lisa", "Worst Painting Ever", false)
        );
    }

    store.save(image).await.expect("Failed to save image");
    for _ in 0..3 {
        assert_eq!(
            view_of(&engine, &store, "artwork", "a1", "short").await,
            image_at("Picture of Mona Lisa Watercolor", "Worst Painting Ever", false)
        );
        assert_eq!(
            view_of(&engine, &store, "artwork", "a1", "all").await,
            image_at("Picture of Mona Lisa Watercolor", "Worst Painting Ever", true)
        );
    }
}

#[tokio::test]
async fn test_missing_has_one_is_null() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    artwork_fixture(&mut engine, &store).await;
    store
        .save(Record::new("artwork", "a2").with("name", json!("Untitled")))
        .await
        .expect("Failed to save artwork");

    assert_eq!(
        view_of(&engine, &store, "artwork", "a2", "short").await,
        json!({"name": "Untitled", "image": null})
    );
}

#[tokio::test]
async fn test_reference_loader_function() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    let lookup = store.clone();
    engine
        .register(
            EntityTypeDef::new("playlist")
                .field(FieldDef::new("name"))
                .field(FieldDef::reference_with("featured", move |owner| {
                    let lookup = lookup.clone();
                    async move {
                        let id = owner.foreign_key("featured_id").unwrap_or_default();
                        Ok::<Related, Error>(lookup.get("song", &id).map(Record::into_ref).into())
                    }
                })),
        )
        .expect("Failed to register playlist");
    engine
        .register(EntityTypeDef::new("song").field(FieldDef::new("title")))
        .expect("Failed to register song");

    store
        .save(Record::new("song", "s1").with("title", json!("Blue")))
        .await
        .expect("Failed to save song");
    store
        .save(
            Record::new("playlist", "p1")
                .with("name", json!("Mix"))
                .with("featured_id", json!("s1")),
        )
        .await
        .expect("Failed to save playlist");

    assert_eq!(
        view_of(&engine, &store, "playlist", "p1", "short").await,
        json!({"name": "Mix", "featured": {"title": "Blue"}})
    );
}

// ============================================================================
// Hiding
// ============================================================================

#[tokio::test]
async fn test_top_level_view_ignores_hide_as_child() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    engine.register(secret_def()).expect("Failed to register");
    store.save(secret("s1", true)).await.expect("Failed to save");
    store.save(secret("s2", false)).await.expect("Failed to save");

    for id in ["s1", "s2"] {
        assert_eq!(
            view_of(&engine, &store, "secret", id, "short").await,
            json!({"secret": "Afraid of the dark"})
        );
    }
}

/// Fast-path (belongs-to) children are hidden below the highest tier.
#[tokio::test]
async fn test_hidden_child_is_null_below_all() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    store.define_association("secret_parent", "child", Association::belongs_to("secret", "child_id"));
    engine.register(secret_def()).expect("Failed to register");
    engine
        .register(
            EntityTypeDef::new("secret_parent")
                .field(FieldDef::new("name"))
                .field(FieldDef::reference("child")),
        )
        .expect("Failed to register");

    store.save(secret("told", true)).await.expect("Failed to save");
    store.save(secret("kept", false)).await.expect("Failed to save");
    store
        .save(
            Record::new("secret_parent", "p1")
                .with("name", json!("Parent"))
                .with("child_id", json!("told")),
        )
        .await
        .expect("Failed to save");
    store
        .save(
            Record::new("secret_parent", "p2")
                .with("name", json!("Parent"))
                .with("child_id", json!("kept")),
        )
        .await
        .expect("Failed to save");

    let p1 = view_of(&engine, &store, "secret_parent", "p1", "short").await;
    assert_eq!(p1["child"], json!({"secret": "Afraid of the dark"}));

    let p2 = view_of(&engine, &store, "secret_parent", "p2", "short").await;
    assert_eq!(p2["child"], Value::Null);
    let p2 = view_of(&engine, &store, "secret_parent", "p2", "public").await;
    assert_eq!(p2["child"], Value::Null);

    // Hiding never applies at the highest tier
    let p2 = view_of(&engine, &store, "secret_parent", "p2", "all").await;
    assert_eq!(p2["child"], json!({"secret": "Afraid of the dark"}));
}

/// Slow-path children are viewed at the top level and are never hidden.
#[tokio::test]
async fn test_slow_path_child_is_never_hidden() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    store.define_association("vault", "secret", Association::has_one("secret", "vault_id"));
    engine.register(secret_def()).expect("Failed to register");
    engine
        .register(EntityTypeDef::new("vault").field(FieldDef::reference("secret")))
        .expect("Failed to register");

    store
        .save(Record::new("vault", "v1"))
        .await
        .expect("Failed to save");
    store
        .save(secret("kept", false).with("vault_id", json!("v1")))
        .await
        .expect("Failed to save");

    assert_eq!(
        view_of(&engine, &store, "vault", "v1", "short").await,
        json!({"secret": {"secret": "Afraid of the dark"}})
    );
}

/// Missing and hidden entries are dropped from a to-many reference.
#[tokio::test]
async fn test_many_to_many_compacts_missing_and_hidden() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    store.define_association("box", "secrets", Association::many_to_many("secret", "secret_ids"));
    engine.register(secret_def()).expect("Failed to register");
    engine
        .register(EntityTypeDef::new("box").field(FieldDef::reference("secrets")))
        .expect("Failed to register");

    store.save(secret("s1", true)).await.expect("Failed to save");
    store.save(secret("s3", false)).await.expect("Failed to save");
    store
        .save(Record::new("box", "b1").with("secret_ids", json!(["s1", "missing", "s3"])))
        .await
        .expect("Failed to save");
    store
        .save(Record::new("box", "b2").with("secret_ids", json!([])))
        .await
        .expect("Failed to save");

    let told = json!({"secret": "Afraid of the dark"});
    assert_eq!(
        view_of(&engine, &store, "box", "b1", "short").await,
        json!({"secrets": [told]})
    );
    assert_eq!(
        view_of(&engine, &store, "box", "b1", "all").await,
        json!({"secrets": [told, told]})
    );
    assert_eq!(
        view_of(&engine, &store, "box", "b2", "short").await,
        json!({"secrets": []})
    );
}

// ============================================================================
// Multi-level hierarchy (fast path)
// ============================================================================

#[tokio::test]
async fn test_hierarchy_passes_tiers_down() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    hierarchy_fixture(&mut engine, &store).await;

    let common = "http://example.com/common.jpg";
    let narrow_image = json!({
        "name": "Image",
        "urls": [{"url": common}, {"url": common}, {"url": common}]
    });

    for _ in 0..3 {
        assert_eq!(
            view_of(&engine, &store, "gallery_artwork", "a1", "short").await,
            json!({"name": "Artwork", "image": narrow_image})
        );
        assert_eq!(
            view_of(&engine, &store, "gallery_artwork", "a1", "public").await,
            json!({"name": "Artwork", "display_name": "Awesome Artwork", "image": narrow_image})
        );
        assert_eq!(
            view_of(&engine, &store, "gallery_artwork", "a1", "all").await,
            json!({
                "name": "Artwork",
                "display_name": "Awesome Artwork",
                "price": 1000,
                "image": {
                    "name": "Image",
                    "urls": [
                        {"url": common, "is_public": false},
                        {"url": common, "is_public": false},
                        {"url": common, "is_public": false}
                    ]
                }
            })
        );
    }
}

#[tokio::test]
async fn test_hierarchy_updates_when_leaf_is_saved() {
    let store = InMemoryEntityStore::new();
    let backend = InMemoryBackend::new();
    let mut engine = engine_with(&store, ViewConfig::new(backend.clone()));
    hierarchy_fixture(&mut engine, &store).await;

    let before = view_of(&engine, &store, "gallery_artwork", "a1", "short").await;
    assert!(backend.contains_key("as_json/gallery_artwork/a1/short/true"));
    assert!(backend.contains_key("as_json/gallery_image/i1/short/false"));
    assert!(backend.contains_key("as_json/gallery_url/u1/short/false"));

    let new_url = "http://chee.sy/omg.jpg";
    let mut url = entity_record("gallery_url", "u1", &store);
    url.set("url", json!(new_url));

    for _ in 0..3 {
        assert_eq!(
            view_of(&engine, &store, "gallery_artwork", "a1", "short").await,
            before
        );
    }

    store.save(url).await.expect("Failed to save url");

    // Only the url's own entries were dropped
    assert!(backend.contains_key("as_json/gallery_artwork/a1/short/true"));
    assert!(backend.contains_key("as_json/gallery_image/i1/short/false"));
    assert!(!backend.contains_key("as_json/gallery_url/u1/short/false"));

    for _ in 0..3 {
        let view = view_of(&engine, &store, "gallery_artwork", "a1", "short").await;
        assert_eq!(view["name"], json!("Artwork"));
        assert_eq!(view["image"]["name"], json!("Image"));

        let mut urls: Vec<&str> = view["image"]["urls"]
            .as_array()
            .expect("urls should be an array")
            .iter()
            .filter_map(|u| u["url"].as_str())
            .collect();
        urls.sort();
        let mut expected = vec!["http://example.com/common.jpg", "http://example.com/common.jpg", new_url];
        expected.sort();
        assert_eq!(urls, expected);
    }
}

/// Tier monotonicity holds for composed views too.
#[tokio::test]
async fn test_wider_tiers_are_supersets() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    hierarchy_fixture(&mut engine, &store).await;

    let keys = |view: Value| -> Vec<String> {
        let mut keys: Vec<String> = view
            .as_object()
            .expect("view is an object")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    };

    let short = keys(view_of(&engine, &store, "gallery_artwork", "a1", "short").await);
    let public = keys(view_of(&engine, &store, "gallery_artwork", "a1", "public").await);
    let all = keys(view_of(&engine, &store, "gallery_artwork", "a1", "all").await);

    assert!(short.iter().all(|k| public.contains(k)));
    assert!(public.iter().all(|k| all.contains(k)));
}

// ============================================================================
// Declarative schemas and shared service
// ============================================================================

#[tokio::test]
async fn test_declarative_schema_from_json() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    store.define_association("team", "members", Association::has_many("member", "team_id"));

    let team: Vec<FieldDecl> = serde_json::from_value(json!([
        {"name": "Name", "definition": "name"},
        {"name": "budget", "properties": "all"},
        {"name": "members", "type": "reference"}
    ]))
    .expect("Failed to parse field declarations");
    engine
        .register(EntityTypeDef::from_decls("team", team).expect("Valid declarations"))
        .expect("Failed to register team");
    engine
        .register(EntityTypeDef::new("member").field(FieldDef::new("name")))
        .expect("Failed to register member");

    store
        .save(Record::new("team", "t1").with("name", json!("Core")).with("budget", json!(10)))
        .await
        .expect("Failed to save");
    store
        .save(Record::new("member", "m1").with("name", json!("Ada")).with("team_id", json!("t1")))
        .await
        .expect("Failed to save");

    assert_eq!(
        view_of(&engine, &store, "team", "t1", "short").await,
        json!({"Name": "Core", "members": [{"name": "Ada"}]})
    );
    assert_eq!(
        view_of(&engine, &store, "team", "t1", "all").await,
        json!({"Name": "Core", "budget": 10, "members": [{"name": "Ada"}]})
    );
}

#[tokio::test]
async fn test_registration_errors() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));

    let duplicate = EntityTypeDef::new("foobar")
        .field(FieldDef::new("foo"))
        .field(FieldDef::new("foo").properties("all"));
    assert!(matches!(engine.register(duplicate), Err(Error::ConfigError(_))));

    let unknown_kind: Vec<FieldDecl> =
        serde_json::from_value(json!([{"name": "foo", "type": "embedded"}])).expect("Valid JSON");
    assert!(matches!(
        EntityTypeDef::from_decls("foobar", unknown_kind),
        Err(Error::ConfigError(_))
    ));

    engine
        .register(foobar_def(Arc::new(AtomicUsize::new(0))))
        .expect("Failed to register");
    assert!(matches!(
        engine.register(foobar_def(Arc::new(AtomicUsize::new(0)))),
        Err(Error::ConfigError(_))
    ));
}

#[tokio::test]
async fn test_view_service_concurrent_readers_agree() {
    let store = InMemoryEntityStore::new();
    let mut engine = engine_with(&store, ViewConfig::new(InMemoryBackend::new()));
    hierarchy_fixture(&mut engine, &store).await;
    let service = ViewService::new(engine);

    let mut handles = vec![];
    for _ in 0..16 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .view_by_id("gallery_artwork", "a1", &ViewOptions::new("all"))
                .await
                .expect("View should succeed")
                .expect("View should exist")
        }));
    }

    let mut views = vec![];
    for handle in handles {
        views.push(handle.await.expect("Task failed"));
    }
    assert!(views.windows(2).all(|pair| pair[0] == pair[1]));
}
