//! Ready-made mappings and seed data shared by the CLI walkthrough and tests.

use crate::core::{Result, Value};
use crate::metadata::{
    AttributeMapping, EntityMapping, FetchMode, GenerationTiming, IdentityGeneration, Metamodel,
    ValueGeneration,
};
use crate::session::SessionConfig;
use crate::store::MemoryStore;
use uuid::Uuid;

/// `Customer` owns a lazy one-to-one to `SupplementalInfo`; the inverse side
/// is join fetched, so loading a `SupplementalInfo` also initializes its
/// customer.
pub fn customer_supplemental() -> Result<Metamodel> {
    Metamodel::builder()
        .entity(
            EntityMapping::new("Customer", "customer")
                .attribute(AttributeMapping::identity("id"))
                .attribute(AttributeMapping::basic("name"))
                .attribute(AttributeMapping::to_one(
                    "supplemental_info",
                    "SupplementalInfo",
                )),
        )
        .entity(
            EntityMapping::new("SupplementalInfo", "supplemental")
                .attribute(AttributeMapping::identity("id"))
                .attribute(
                    AttributeMapping::to_one("customer", "Customer")
                        .mapped_by("supplemental_info")
                        .fetch_mode(FetchMode::Join)
                        .optional(false),
                )
                .attribute(AttributeMapping::basic("something")),
        )
        .build()
}

/// Customer 1 "Acme Brick" with supplemental info 1 "extra details".
pub async fn seed_customer_supplemental(store: &MemoryStore) -> Result<()> {
    let mut uow = store.unit_of_work(SessionConfig::new().name("seed"))?;
    uow.persist(
        "SupplementalInfo",
        [
            ("id", Value::from(1)),
            ("something", Value::from("extra details")),
        ],
    )
    .await?;
    uow.persist(
        "Customer",
        [
            ("id", Value::from(1)),
            ("name", Value::from("Acme Brick")),
            ("supplemental_info", Value::from(1)),
        ],
    )
    .await?;
    uow.commit().await
}

/// `Book` with an eager select-fetched author, a lazy "text" group and a
/// lazy cover in the default lazy group.
pub fn library() -> Result<Metamodel> {
    Metamodel::builder()
        .entity(
            EntityMapping::new("Author", "author")
                .attribute(AttributeMapping::identity("id"))
                .attribute(AttributeMapping::basic("name")),
        )
        .entity(
            EntityMapping::new("Book", "book")
                .description("Book with lazily loaded text")
                .attribute(AttributeMapping::identity("id"))
                .attribute(AttributeMapping::basic("title"))
                .attribute(AttributeMapping::to_one("author", "Author").column("author_id"))
                .attribute(AttributeMapping::basic("isbn"))
                .attribute(AttributeMapping::basic("synopsis").lazy().group("text"))
                .attribute(AttributeMapping::basic("content").lazy().group("text"))
                .attribute(AttributeMapping::basic("cover").lazy()),
        )
        .build()
}

/// Author 1 and Book 1.
pub async fn seed_library(store: &MemoryStore) -> Result<()> {
    let mut uow = store.unit_of_work(SessionConfig::new().name("seed"))?;
    uow.persist(
        "Author",
        [("id", Value::from(1)), ("name", Value::from("Ursula K. Le Guin"))],
    )
    .await?;
    uow.persist(
        "Book",
        [
            ("id", Value::from(1)),
            ("title", Value::from("The Dispossessed")),
            ("author", Value::from(1)),
            ("isbn", Value::from("978-0-06-051275-3")),
            ("synopsis", Value::from("Two worlds, one physicist.")),
            ("content", Value::from("The wall ran around the spaceport.")),
            ("cover", Value::from("dispossessed.png")),
        ],
    )
    .await?;
    uow.commit().await
}

/// `Event` with a sequence identity and generated columns: an in-memory
/// token, a creation timestamp set on insert and a modification timestamp
/// set on every write.
pub fn events() -> Result<Metamodel> {
    Metamodel::builder()
        .entity(
            EntityMapping::new("Event", "event")
                .attribute(
                    AttributeMapping::identity("id")
                        .generated_identity(IdentityGeneration::Sequence),
                )
                .attribute(AttributeMapping::basic("name"))
                .attribute(AttributeMapping::basic("token").generated(
                    ValueGeneration::in_memory(GenerationTiming::Insert, || {
                        Value::Text(Uuid::new_v4().to_string())
                    }),
                ))
                .attribute(AttributeMapping::basic("created_at").generated(
                    ValueGeneration::database(GenerationTiming::Insert, "current_timestamp"),
                ))
                .attribute(AttributeMapping::basic("updated_at").generated(
                    ValueGeneration::database(GenerationTiming::Always, "current_timestamp"),
                )),
        )
        .build()
}
