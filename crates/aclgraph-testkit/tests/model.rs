//! Random programs must behave the same on the service and the reference model.

use proptest::prelude::*;

use aclgraph::{AclConfig, PermissionService};
use aclgraph_core::RevokeMode;
use aclgraph_store::{MemoryStore, SqliteStore, Store};
use aclgraph_testkit::generators::{program, AclOp};
use aclgraph_testkit::model::{apply_to_service, snapshot_service, ReferenceModel};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn run_against<S: Store>(store: S, mode: RevokeMode, ops: &[AclOp]) -> Result<(), TestCaseError> {
    let config = AclConfig {
        revoke_mode: mode,
        ..AclConfig::default()
    };
    let service = PermissionService::new(store, config);
    let mut model = ReferenceModel::new(mode);

    runtime().block_on(async {
        for (step, op) in ops.iter().enumerate() {
            let expected = model.apply(op);
            let actual = apply_to_service(&service, op).await;
            prop_assert_eq!(actual, expected, "step {} diverged on {:?}", step, op);
        }
        let actual = snapshot_service(&service).await.unwrap();
        prop_assert_eq!(actual, model.snapshot());
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn memory_store_matches_model(ops in program(40)) {
        run_against(MemoryStore::new(), RevokeMode::ClearBits, &ops)?;
    }

    #[test]
    fn sqlite_store_matches_model(ops in program(40)) {
        run_against(SqliteStore::open_memory().unwrap(), RevokeMode::ClearBits, &ops)?;
    }

    #[test]
    fn exact_mask_matches_model(ops in program(40)) {
        run_against(MemoryStore::new(), RevokeMode::ExactMask, &ops)?;
    }
}
