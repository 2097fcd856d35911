//! End-to-end harness tests: deploy, call, revert, logs, state scoping
//!
//! Runs hand-assembled contracts through the full pipeline: factory deploy
//! with constructor args, typed calls with return decoding, revert matching
//! against dev reasons, event decoding and snapshot/anchor discipline.

mod common;

use common::*;
use revm_harness::abi::event::event_topic;
use revm_harness::alloy::primitives::{B256, U256};
use revm_harness::contract::artifact::CompilerArtifact;
use revm_harness::{
    AbiValue, CallRequest, ContractFactory, DecodedLog, DeployRequest, Env, ErrorPattern,
    HarnessError,
};

#[test]
fn test_deploy_and_call_counter() {
    let mut env = Env::new();
    let (artifact, ..) = counter_artifact();
    let factory = ContractFactory::from_artifact(artifact);

    let counter = factory
        .deploy(&mut env, &[AbiValue::from(100u64)])
        .unwrap();

    // constructor stored the initial supply
    let supply = counter.call(&mut env, "totalSupply", &[]).unwrap();
    assert_eq!(supply, Some(AbiValue::from(100u64)));

    // mutating call adds and returns the new value
    let updated = counter
        .call(&mut env, "update_total_supply", &[AbiValue::from(5u64)])
        .unwrap();
    assert_eq!(updated, Some(AbiValue::from(105u64)));

    let supply = counter.call(&mut env, "totalSupply", &[]).unwrap();
    assert_eq!(supply, Some(AbiValue::from(105u64)));
}

#[test]
fn test_named_constructor_and_registration_invariant() {
    let mut env = Env::new();
    let (artifact, ..) = counter_artifact();
    let runtime = artifact.bytecode_runtime.clone();
    let factory = ContractFactory::from_artifact(artifact);
    let counter = factory.deploy(&mut env, &[AbiValue::from(7u64)]).unwrap();

    // registry invariant: lookup by address sees the contract, and the
    // code at the address is the expected runtime
    let found = env.lookup_contract(counter.address()).unwrap();
    assert_eq!(found.reg.name, "Counter");
    assert_eq!(env.get_code(counter.address()), runtime);
}

#[test]
fn test_view_call_does_not_commit() {
    let mut env = Env::new();
    let (artifact, ..) = counter_artifact();
    let factory = ContractFactory::from_artifact(artifact);
    let counter = factory.deploy(&mut env, &[AbiValue::from(1u64)]).unwrap();

    // forced-view dispatch computes the new value but never commits it
    let mut opts = revm_harness::CallOpts::default();
    opts.force_view = true;
    let read = counter
        .call_with(&mut env, "update_total_supply", &[AbiValue::from(5u64)], opts)
        .unwrap();
    assert_eq!(read, Some(AbiValue::from(6u64)));
    let slot0 = env.get_storage(counter.address(), U256::ZERO);
    assert_eq!(slot0, U256::from(1));
}

#[test]
fn test_revert_with_dev_reason() {
    let mut env = Env::new();
    let factory = ContractFactory::from_artifact(revert_artifact());
    let reverter = factory.deploy(&mut env, &[]).unwrap();

    // non-reverting path
    assert_eq!(
        reverter
            .call(&mut env, "foo", &[AbiValue::from(2u64)])
            .unwrap(),
        None
    );

    // reverting path carries the decoded Error(string) reason
    let err = reverter
        .call(&mut env, "foo", &[AbiValue::from(1u64)])
        .unwrap_err();
    let HarnessError::Revert(revert) = &err else {
        panic!("expected revert, got {err}");
    };
    let frame = revert.stack_trace.last_frame().unwrap();
    assert_eq!(frame.pretty_vm_reason(), "x is 1");
    assert_eq!(frame.error_detail(), Some("user revert with reason"));
    let dev = frame.dev_reason().unwrap();
    assert_eq!(dev.reason_type, "reason");
    assert_eq!(dev.reason_str, "x is 1");
}

#[test]
fn test_reverts_scope_matches_and_mismatches() {
    let mut env = Env::new();
    let factory = ContractFactory::from_artifact(revert_artifact());
    let reverter = factory.deploy(&mut env, &[]).unwrap();

    // matching reason passes
    env.reverts(ErrorPattern::reason("x is 1"), |env| {
        reverter.call(env, "foo", &[AbiValue::from(1u64)])
    })
    .unwrap();

    // literal and vm_error forms match too
    env.reverts(ErrorPattern::Literal("x is 1".into()), |env| {
        reverter.call(env, "foo", &[AbiValue::from(1u64)])
    })
    .unwrap();
    env.reverts(ErrorPattern::VmError("x is 1".into()), |env| {
        reverter.call(env, "foo", &[AbiValue::from(1u64)])
    })
    .unwrap();

    // wrong reason string fails
    assert!(env
        .reverts(ErrorPattern::reason("x is 2"), |env| {
            reverter.call(env, "foo", &[AbiValue::from(1u64)])
        })
        .is_err());

    // not reverting at all fails
    assert!(env
        .reverts(ErrorPattern::Any, |env| {
            reverter.call(env, "foo", &[AbiValue::from(2u64)])
        })
        .is_err());
}

#[test]
fn test_event_logs_decode_in_order() {
    let mut env = Env::new();

    let transfer = revm_harness::abi::function::AbiEntry {
        kind: "event".into(),
        name: Some("Transfer".into()),
        inputs: vec![
            revm_harness::abi::function::AbiParam {
                name: "sender".into(),
                ty: "address".into(),
                indexed: Some(true),
                ..Default::default()
            },
            revm_harness::abi::function::AbiParam {
                name: "receiver".into(),
                ty: "address".into(),
                indexed: Some(true),
                ..Default::default()
            },
            revm_harness::abi::function::AbiParam {
                name: "value".into(),
                ty: "uint256".into(),
                indexed: Some(false),
                ..Default::default()
            },
        ],
        outputs: vec![],
        state_mutability: None,
        anonymous: Some(false),
    };

    let alice = env.generate_address(Some("alice"));
    let bob = env.generate_address(Some("bob"));
    let topic0 = event_topic(&transfer);
    let runtime = log3_runtime(
        &topic0.0,
        &B256::left_padding_from(alice.as_slice()).0,
        &B256::left_padding_from(bob.as_slice()).0,
        42,
    );

    let artifact = CompilerArtifact {
        contract_name: "Emitter".into(),
        bytecode: initcode_for(&runtime).into(),
        bytecode_runtime: runtime.into(),
        abi: vec![
            transfer,
            function_entry("emit_transfer", &[], &[], "nonpayable"),
        ],
        ..Default::default()
    };
    let factory = ContractFactory::from_artifact(artifact);
    let emitter = factory.deploy(&mut env, &[]).unwrap();

    let computation = env
        .raw_call(CallRequest::to(emitter.address()))
        .unwrap();
    let logs = emitter.get_logs(&env, &computation, true);
    assert_eq!(logs.len(), 1);
    let DecodedLog::Decoded(event) = &logs[0] else {
        panic!("expected a decoded event");
    };
    assert_eq!(event.name, "Transfer");
    assert_eq!(event.address, emitter.address());
    assert_eq!(event.field("sender"), Some(&AbiValue::Address(alice)));
    assert_eq!(event.field("receiver"), Some(&AbiValue::Address(bob)));
    assert_eq!(event.field("value"), Some(&AbiValue::from(42u64)));
}

#[test]
fn test_snapshot_revert_restores_storage() {
    let mut env = Env::new();
    let (artifact, ..) = counter_artifact();
    let factory = ContractFactory::from_artifact(artifact);
    let counter = factory.deploy(&mut env, &[AbiValue::from(10u64)]).unwrap();

    let snap = env.snapshot();
    counter
        .call(&mut env, "update_total_supply", &[AbiValue::from(90u64)])
        .unwrap();
    assert_eq!(
        env.get_storage(counter.address(), U256::ZERO),
        U256::from(100)
    );

    env.revert(snap).unwrap();
    assert_eq!(
        env.get_storage(counter.address(), U256::ZERO),
        U256::from(10)
    );
}

#[test]
fn test_anchor_restores_across_calls() {
    let mut env = Env::new();
    let (artifact, ..) = counter_artifact();
    let factory = ContractFactory::from_artifact(artifact);
    let counter = factory.deploy(&mut env, &[AbiValue::from(1u64)]).unwrap();

    env.anchor(|env| {
        counter.call(env, "update_total_supply", &[AbiValue::from(41u64)])?;
        assert_eq!(env.get_storage(counter.address(), U256::ZERO), U256::from(42));
        Ok(())
    })
    .unwrap();
    assert_eq!(env.get_storage(counter.address(), U256::ZERO), U256::from(1));
}

#[test]
fn test_value_transfer_moves_balance() {
    let mut env = Env::new();
    let receiver = env.generate_address(Some("receiver"));
    let sender = env.eoa();
    env.set_balance(sender, U256::from(1_000_000u64));

    env.raw_call(
        CallRequest::to(receiver)
            .with_value(U256::from(250u64))
            .with_gas(1_000_000),
    )
    .unwrap();

    assert_eq!(env.get_balance(receiver), U256::from(250));
    assert_eq!(env.get_balance(sender), U256::from(999_750));
}

#[test]
fn test_execute_code_captures_error_silently() {
    let mut env = Env::new();
    let factory = ContractFactory::from_artifact(revert_artifact());
    let reverter = factory.deploy(&mut env, &[]).unwrap();

    // execute_code returns the errored computation instead of raising
    let mut calldata = revm_harness::abi::function::AbiFunction::new(
        function_entry("foo", &[("x", "uint256")], &[], "nonpayable"),
        "Reverter",
    )
    .method_id()
    .to_vec();
    calldata.extend_from_slice(&word(1));

    let computation = env
        .execute_code(CallRequest::to(reverter.address()).with_data(calldata))
        .unwrap();
    assert!(computation.is_error());
    assert_eq!(
        computation.error.as_ref().unwrap().pretty_reason(),
        "x is 1"
    );
    // the PC trace ends at the revert site
    assert_eq!(*computation.pc_trace.last().unwrap(), 23);
}

#[test]
fn test_deploy_failure_raises_with_trace() {
    let mut env = Env::new();
    // initcode that immediately reverts
    let initcode = vec![0x60, 0x00, 0x60, 0x00, 0xfd];
    let err = env.deploy_code(DeployRequest::new(initcode)).unwrap_err();
    assert!(matches!(err, HarnessError::Revert(_)));
}

#[test]
fn test_abi_contract_overload_resolution() {
    let mut env = Env::new();
    // a contract returning the constant 5 regardless of selector
    let (address, _) = env
        .deploy_code(DeployRequest::new(initcode_for(&five_runtime())))
        .unwrap();

    let factory = revm_harness::AbiContractFactory::new(
        "Overloaded",
        vec![
            function_entry("f", &[("x", "int8")], &["int8"], "nonpayable"),
            function_entry("f", &[("x", "uint256")], &["uint256"], "nonpayable"),
        ],
        None,
    );
    let contract = factory.at(&mut env, address);

    // 1000 does not fit int8: the uint256 overload runs
    let result = contract
        .call(&mut env, "f", &[AbiValue::from(1000u64)])
        .unwrap();
    assert_eq!(result, Some(AbiValue::from(5u64)));

    // -1 does not fit uint256: the int8 overload runs
    let result = contract
        .call(&mut env, "f", &[AbiValue::from(-1i64)])
        .unwrap();
    assert_eq!(result, Some(AbiValue::from(5i64)));

    // 0 fits both: ambiguous without a disambiguator
    let err = contract
        .call(&mut env, "f", &[AbiValue::from(0u64)])
        .unwrap_err();
    assert!(matches!(
        err,
        HarnessError::Overload(revm_harness::errors::OverloadError::Ambiguous { .. })
    ));

    // the disambiguating signature forces one overload
    let result = contract
        .call_with(
            &mut env,
            "f",
            &[AbiValue::from(0u64)],
            revm_harness::CallOpts::default().disambiguate("f(int8)"),
        )
        .unwrap();
    assert_eq!(result, Some(AbiValue::from(5i64)));
}

#[test]
fn test_abi_contract_at_empty_address_does_not_raise() {
    let mut env = Env::new();
    let empty = env.generate_address(None);
    let factory = revm_harness::AbiContractFactory::new(
        "Ghost",
        vec![function_entry("g", &[], &["uint256"], "view")],
        None,
    );
    // construction warns but succeeds
    let contract = factory.at(&mut env, empty);
    assert_eq!(contract.address(), empty);
}

#[test]
fn test_eval_substitutes_bytecode_for_one_call() {
    use revm_harness::{CompilerBackend, SyntheticCall};

    // a backend that compiles every statement to "return 5"
    struct ConstFive;
    impl CompilerBackend for ConstFive {
        fn compile_stmt(
            &self,
            _artifact: &CompilerArtifact,
            _stmt: &str,
        ) -> Result<SyntheticCall, HarnessError> {
            Ok(SyntheticCall {
                bytecode_runtime: five_runtime().into(),
                selector: *b"dbug",
                args_schema: "()".into(),
                return_schema: "(uint256)".into(),
            })
        }

        fn compile_internal_stub(
            &self,
            artifact: &CompilerArtifact,
            _fn_name: &str,
        ) -> Result<SyntheticCall, HarnessError> {
            self.compile_stmt(artifact, "")
        }

        fn compile_with_function(
            &self,
            artifact: &CompilerArtifact,
            _fn_source: &str,
            _force: bool,
        ) -> Result<CompilerArtifact, HarnessError> {
            Ok(artifact.clone())
        }
    }

    let mut env = Env::new();
    let (artifact, ..) = counter_artifact();
    let runtime = artifact.bytecode_runtime.clone();
    let factory = ContractFactory::from_artifact(artifact);
    let counter = factory.deploy(&mut env, &[AbiValue::from(9u64)]).unwrap();

    let result = counter.eval(&mut env, &ConstFive, "self.anything()").unwrap();
    assert_eq!(result, Some(AbiValue::from(5u64)));

    // the substitution lasted one call: the deployed runtime is back and
    // the contract still behaves as before
    assert_eq!(env.get_code(counter.address()), runtime);
    assert_eq!(
        counter.call(&mut env, "totalSupply", &[]).unwrap(),
        Some(AbiValue::from(9u64))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_fork_rejects_bad_url_scheme() {
    init_tracing();
    let mut env = Env::new();
    let err = env.fork("ftp://not-a-node").await.unwrap_err();
    assert!(err.to_string().contains("Unsupported RPC URL scheme"));

    // dirty local state refuses to fork even before touching the network
    let (artifact, ..) = counter_artifact();
    let factory = ContractFactory::from_artifact(artifact);
    factory.deploy(&mut env, &[AbiValue::from(1u64)]).unwrap();
    let err = env
        .fork_at("ftp://not-a-node", "latest", false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("dirty local state"));
}
