/// Metamodel tests
///
/// Mapping validation and fetch group layout through the public builder.
/// Run with: cargo test --test metamodel_tests

use lazyorm::metadata::{FetchGroupId, Resolution};
use lazyorm::{AttributeMapping, EntityMapping, FetchMode, Metamodel, OrmError, fixtures};

fn group_names(model: &Metamodel, entity: &str) -> Vec<String> {
    model
        .entity(entity)
        .unwrap()
        .fetch_groups()
        .iter()
        .map(|group| group.name().to_string())
        .collect()
}

#[test]
fn test_fixture_layouts() {
    let library = fixtures::library().unwrap();
    assert_eq!(group_names(&library, "Book"), vec!["base", "text", "DEFAULT"]);
    assert_eq!(group_names(&library, "Author"), vec!["base"]);

    let book = library.entity("Book").unwrap();
    assert_eq!(book.attribute("author").unwrap().column(), "author_id");
    assert!(book.attribute("cover").unwrap().is_lazy());
    assert_eq!(book.base_group().len(), 3);

    let customers = fixtures::customer_supplemental().unwrap();
    let info = customers.entity("SupplementalInfo").unwrap();
    let customer = info.attribute("customer").unwrap();
    assert!(!customer.is_column_backed());
    let association = customer.association().unwrap();
    assert!(association.is_inverse());
    assert!(association.is_join_fetched());
    assert_eq!(info.base_group().joins(), &[customer.index()]);
}

#[test]
fn test_explicit_group_declaration() {
    let model = Metamodel::builder()
        .entity(
            EntityMapping::new("Profile", "profile")
                .attribute(AttributeMapping::identity("id"))
                .attribute(AttributeMapping::basic("handle"))
                .attribute(AttributeMapping::basic("bio").lazy())
                .attribute(AttributeMapping::basic("avatar").lazy())
                .attribute(AttributeMapping::basic("banner").lazy())
                .fetch_group("media", ["avatar", "banner"]),
        )
        .build()
        .unwrap();

    match model.resolve("Profile", "banner").unwrap() {
        Resolution::Group(group) => {
            assert_eq!(group.name(), "media");
            assert!(group.contains(3));
            assert!(group.contains(4));
        }
        Resolution::Identity => panic!("banner is not the identity"),
    }
    match model.resolve("Profile", "bio").unwrap() {
        Resolution::Group(group) => assert_eq!(group.name(), "DEFAULT"),
        Resolution::Identity => panic!("bio is not the identity"),
    }
    match model.resolve("Profile", "handle").unwrap() {
        Resolution::Group(group) => assert_eq!(group.id(), FetchGroupId::BASE),
        Resolution::Identity => panic!("handle is not the identity"),
    }
    assert_eq!(model.resolve("Profile", "id").unwrap(), Resolution::Identity);
}

#[test]
fn test_invalid_mappings_are_rejected() {
    let unknown_target = Metamodel::builder()
        .entity(
            EntityMapping::new("Order", "orders")
                .attribute(AttributeMapping::identity("id"))
                .attribute(AttributeMapping::to_one("buyer", "Buyer")),
        )
        .build();
    assert!(matches!(unknown_target, Err(OrmError::InvalidMapping(_))));

    let twice = Metamodel::builder()
        .entity(EntityMapping::new("A", "a").attribute(AttributeMapping::identity("id")))
        .entity(EntityMapping::new("A", "a2").attribute(AttributeMapping::identity("id")))
        .build();
    assert!(matches!(twice, Err(OrmError::InvalidMapping(_))));

    let lazy_identity = Metamodel::builder()
        .entity(EntityMapping::new("B", "b").attribute(AttributeMapping::identity("id").lazy()))
        .build();
    assert!(matches!(lazy_identity, Err(OrmError::InconsistentFetchGroup(_))));

    let eager_in_group = Metamodel::builder()
        .entity(
            EntityMapping::new("C", "c")
                .attribute(AttributeMapping::identity("id"))
                .attribute(AttributeMapping::basic("note").group("extra")),
        )
        .build();
    assert!(matches!(eager_in_group, Err(OrmError::InconsistentFetchGroup(_))));

    let dangling_inverse = Metamodel::builder()
        .entity(EntityMapping::new("Left", "l").attribute(AttributeMapping::identity("id")))
        .entity(
            EntityMapping::new("Right", "r")
                .attribute(AttributeMapping::identity("id"))
                .attribute(
                    AttributeMapping::to_one("left", "Left")
                        .mapped_by("right")
                        .fetch_mode(FetchMode::Join),
                ),
        )
        .build();
    assert!(matches!(dangling_inverse, Err(OrmError::InvalidMapping(_))));
}

#[test]
fn test_unknown_names() {
    let model = fixtures::library().unwrap();
    assert!(matches!(
        model.entity("Magazine"),
        Err(OrmError::EntityTypeNotFound(_))
    ));
    assert!(matches!(
        model.resolve("Book", "pages"),
        Err(OrmError::AttributeNotFound(..))
    ));
}
