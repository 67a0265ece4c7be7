mod common;

use common::{count_rows, open_shop, open_shop_file, Customer, Order};
use datarepo_core::{ContextRepository, DataError, EntityState, Repository};

#[test]
fn insert_then_save_makes_entity_retrievable_from_a_fresh_context() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shop.db");

    let mut customer = Customer::with_id(7, "Ada");
    customer.email = Some("ada@example.com".to_string());
    {
        let ctx = open_shop_file(&path);
        let repo = ContextRepository::<Customer>::new(&ctx);
        repo.insert(customer.clone()).unwrap();
        assert_eq!(repo.save_changes().unwrap(), 1);
    }

    let ctx = open_shop_file(&path);
    let repo = ContextRepository::<Customer>::new(&ctx);
    let loaded = repo.get_by_id(&7).unwrap().unwrap();
    assert_eq!(loaded.id, Some(7));
    assert_eq!(loaded.name, customer.name);
    assert_eq!(loaded.email, customer.email);
    assert_eq!(loaded.version, 1);
}

#[test]
fn inserted_entity_is_not_visible_before_save() {
    let ctx = open_shop();
    let repo = ContextRepository::<Customer>::new(&ctx);

    repo.insert(Customer::with_id(1, "Ada")).unwrap();
    assert_eq!(repo.state_of(&1), EntityState::Added);
    assert!(repo.get_by_id(&1).unwrap().is_none());
    assert_eq!(count_rows(&ctx, "customers"), 0);

    repo.save_changes().unwrap();
    assert_eq!(repo.state_of(&1), EntityState::Unchanged);
    assert_eq!(repo.get_by_id(&1).unwrap().unwrap().name, "Ada");
}

#[test]
fn generated_keys_are_readable_through_the_entry() {
    let ctx = open_shop();
    let repo = ContextRepository::<Customer>::new(&ctx);

    let first = repo.insert(Customer::new("Ada")).unwrap();
    let second = repo.insert(Customer::new("Grace")).unwrap();
    assert_eq!(repo.tracked(first).unwrap().id, None);

    assert_eq!(repo.save_changes().unwrap(), 2);

    let first_id = repo.tracked(first).unwrap().id.unwrap();
    let second_id = repo.tracked(second).unwrap().id.unwrap();
    assert_ne!(first_id, second_id);
    assert_eq!(repo.get_by_id(&second_id).unwrap().unwrap().name, "Grace");
    assert_eq!(repo.state_of(&first_id), EntityState::Unchanged);
}

#[test]
fn delete_then_save_removes_the_row() {
    let ctx = open_shop();
    let repo = ContextRepository::<Customer>::new(&ctx);
    repo.insert(Customer::with_id(1, "Ada")).unwrap();
    repo.save_changes().unwrap();

    let loaded = repo.get_by_id(&1).unwrap().unwrap();
    repo.delete(loaded).unwrap();
    assert_eq!(repo.state_of(&1), EntityState::Deleted);
    assert_eq!(repo.save_changes().unwrap(), 1);

    assert!(repo.get_by_id(&1).unwrap().is_none());
    assert_eq!(repo.state_of(&1), EntityState::Detached);
    assert_eq!(count_rows(&ctx, "customers"), 0);
}

#[test]
fn deleting_an_added_entity_just_forgets_it() {
    let ctx = open_shop();
    let repo = ContextRepository::<Customer>::new(&ctx);

    repo.insert(Customer::with_id(1, "Ada")).unwrap();
    repo.delete(Customer::with_id(1, "Ada")).unwrap();

    assert_eq!(repo.state_of(&1), EntityState::Detached);
    assert!(!ctx.has_changes());
    assert_eq!(repo.save_changes().unwrap(), 0);
}

#[test]
fn update_with_state_change_persists_new_values() {
    let ctx = open_shop();
    let repo = ContextRepository::<Customer>::new(&ctx);
    repo.insert(Customer::with_id(1, "Ada")).unwrap();
    repo.save_changes().unwrap();

    let mut loaded = repo.get_by_id(&1).unwrap().unwrap();
    loaded.name = "Ada Lovelace".to_string();
    repo.update(loaded, true).unwrap();
    assert_eq!(repo.state_of(&1), EntityState::Modified);

    assert_eq!(repo.save_changes().unwrap(), 1);
    let reloaded = repo.as_no_tracking().first().unwrap().unwrap();
    assert_eq!(reloaded.name, "Ada Lovelace");
    assert_eq!(reloaded.version, 2);
    assert_eq!(repo.get_by_id(&1).unwrap().unwrap().version, 2);
}

#[test]
fn null_arguments_are_rejected_without_touching_the_change_set() {
    let ctx = open_shop();
    let repo = ContextRepository::<Customer>::new(&ctx);

    assert!(matches!(
        repo.insert(None::<Customer>),
        Err(DataError::ArgumentNull("entity"))
    ));
    assert!(matches!(
        repo.update(None::<Customer>, true),
        Err(DataError::ArgumentNull("entity"))
    ));
    assert!(matches!(
        repo.delete(None::<Customer>),
        Err(DataError::ArgumentNull("entity"))
    ));

    assert!(!ctx.has_changes());
    assert!(repo.local().is_empty());
    assert_eq!(repo.save_changes().unwrap(), 0);
}

#[test]
fn saving_an_empty_change_set_returns_zero_every_time() {
    let ctx = open_shop();
    let repo = ContextRepository::<Customer>::new(&ctx);

    assert_eq!(repo.save_changes().unwrap(), 0);
    assert_eq!(repo.save_changes().unwrap(), 0);
}

#[test]
fn inserting_a_tracked_key_twice_is_invalid() {
    let ctx = open_shop();
    let repo = ContextRepository::<Customer>::new(&ctx);

    repo.insert(Customer::with_id(1, "Ada")).unwrap();
    let err = repo.insert(Customer::with_id(1, "Imposter")).unwrap_err();
    assert!(matches!(err, DataError::InvalidOperation(_)));
    assert_eq!(repo.local().len(), 1);
}

#[test]
fn get_by_id_returns_none_for_missing_keys() {
    let ctx = open_shop();
    let repo = ContextRepository::<Order>::new(&ctx);
    assert!(repo.get_by_id(&404).unwrap().is_none());
}

#[test]
fn repositories_share_the_context_entity_set() {
    let ctx = open_shop();
    let first = ContextRepository::<Customer>::new(&ctx);
    let second = ContextRepository::<Customer>::new(&ctx);

    assert!(first.entities().same_set(second.entities()));
    assert!(first.entities().same_set(&ctx.set::<Customer>()));

    first.insert(Customer::with_id(3, "Linus")).unwrap();
    assert_eq!(second.state_of(&3), EntityState::Added);
}
