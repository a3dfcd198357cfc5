use super::*;
use crate::crypto::signature::tests::{public_key, sign};
use crate::virtual_machine::assembler::assemble;
use crate::virtual_machine::disassembler::disassemble;
use crate::virtual_machine::entry::ProvenValue;
use crate::virtual_machine::isa::PUSHDATA;
use proptest::prelude::*;

/// Nonce with an empty predicate, then 100 units of the empty-program asset.
const ISSUE_100: &str = r#""00"x 0 10 [] nonce satisfy 100 [] issue satisfy"#;

fn run_vm(source: &str) -> VM<'static> {
    let program = assemble(source).expect("assembly failed");
    let mut vm = VM::new(DEFAULT_RUNLIMIT);
    vm.run(program).expect("vm run failed");
    vm
}

fn run_expect_err(source: &str) -> VMError {
    let program = assemble(source).expect("assembly failed");
    let mut vm = VM::new(DEFAULT_RUNLIMIT);
    vm.run(program).expect_err("expected vm error")
}

fn data(source: &str) -> Vec<Item> {
    run_vm(source).stacks().data.items().to_vec()
}

fn ints(source: &str) -> Vec<i64> {
    data(source)
        .into_iter()
        .map(|item| match item {
            Item::Int(v) => v,
            other => panic!("expected int, got {other:?}"),
        })
        .collect()
}

fn bytes(b: &[u8]) -> Item {
    Item::from(b)
}

/// Assembly text that pushes `item`.
fn lit(item: &Item) -> String {
    disassemble(&item.encode()).expect("canonical encodings always decode")
}

fn entries(vm: &VM<'_>, id: StackId) -> Vec<Entry> {
    vm.stacks().entry(id).expect("entry stack").entries().to_vec()
}

fn ids(vm: &VM<'_>, id: StackId) -> Vec<Hash> {
    vm.stacks().entry(id).expect("entry stack").ids().to_vec()
}

/// The value left by [`ISSUE_100`].
fn issued_value() -> Value {
    let nonce = Nonce {
        program: Bytes::empty(),
        mintime: 0,
        maxtime: 10,
        blockchain_id: Bytes::from(&[0x00]),
    };
    Value {
        amount: 100,
        asset_id: AssetDefinition::asset_id(&Bytes::empty()),
        anchor: Anchor { value: nonce.id() }.id(),
    }
}

// ==================== Literals & control ====================

#[test]
fn literals_push_items() {
    assert_eq!(ints("0 15 16 300 -1 -20"), vec![0, 15, 16, 300, -1, -20]);
    assert_eq!(data(r#""beef"x"#), vec![bytes(&[0xbe, 0xef])]);
    assert_eq!(
        data(r#"{1, "aa"x}"#),
        vec![Item::tuple([Item::Int(1), bytes(&[0xaa])])]
    );
    assert_eq!(ints(&i64::MIN.to_string()), vec![i64::MIN]);
}

#[test]
fn fail_aborts_with_its_offset() {
    assert_eq!(run_expect_err("fail"), VMError::Failed { pc: 0 });
    assert_eq!(run_expect_err("1 2 fail 3"), VMError::Failed { pc: 2 });
}

#[test]
fn pc_pushes_next_offset() {
    assert_eq!(ints("pc"), vec![1]);
    assert_eq!(ints("7 pc"), vec![7, 2]);
    assert_eq!(ints("[pc] exec"), vec![1]);
}

#[test]
fn jumpif_takes_branch_only_when_true() {
    assert_eq!(ints("1 1 jumpif fail 7"), vec![7]);
    assert_eq!(ints("0 5 jumpif 7"), vec![7]);
    assert_eq!(run_expect_err("0 1 jumpif fail"), VMError::Failed { pc: 3 });
}

#[test]
fn jump_targets_must_stay_inside_the_program() {
    // landing exactly on the end is allowed
    assert!(ints("1 1 jumpif 9").is_empty());
    assert!(matches!(
        run_expect_err("1 5 jumpif"),
        VMError::InvalidJumpTarget { target: 8, len: 3 }
    ));
    assert!(matches!(
        run_expect_err("1 -10 jumpif"),
        VMError::InvalidJumpTarget { .. }
    ));
}

#[test]
fn label_loops_count_down() {
    assert_eq!(ints("3 $loop -1 add dup jumpif:$loop"), vec![0]);
    assert_eq!(ints("5 jump:$skip fail $skip"), vec![5]);
}

#[test]
fn macros_behave() {
    assert_eq!(ints("1 2 swap"), vec![2, 1]);
    assert_eq!(ints("4 dup"), vec![4, 4]);
    assert_eq!(ints("4 5 over"), vec![4, 5, 4]);
    assert_eq!(ints("3 9 max 9 3 max"), vec![9, 9]);
    assert_eq!(ints("3 9 min 9 3 min"), vec![3, 3]);
    assert_eq!(ints("7 bool 0 bool"), vec![1, 0]);
    assert!(ints("1 verify").is_empty());
    assert!(matches!(run_expect_err("0 verify"), VMError::Failed { .. }));
    assert_eq!(ints("1 jump fail 2"), vec![2]);
}

#[test]
fn undefined_opcode_is_invalid() {
    let mut vm = VM::new(DEFAULT_RUNLIMIT);
    assert_eq!(
        vm.run(vec![0xF1, 0x70]),
        Err(VMError::InvalidInstruction {
            opcode: 0x70,
            offset: 1
        })
    );
}

#[test]
fn truncated_pushdata_fails() {
    let mut vm = VM::new(DEFAULT_RUNLIMIT);
    assert!(matches!(
        vm.run(vec![PUSHDATA, 0x05, 0x01]),
        Err(VMError::TruncatedInput { .. })
    ));
}

// ==================== Stack ====================

#[test]
fn roll_bury_reverse_on_data() {
    assert_eq!(ints("1 2 3 0 2 roll"), vec![2, 3, 1]);
    assert_eq!(ints("1 2 3 0 2 bury"), vec![3, 1, 2]);
    assert_eq!(ints("1 2 3 0 3 reverse"), vec![3, 2, 1]);
    assert_eq!(ints("1 2 3 0 0 reverse"), vec![1, 2, 3]);
}

#[test]
fn depth_and_peek() {
    assert_eq!(ints("7 8 0 depth"), vec![7, 8, 2]);
    assert_eq!(ints("5 6 0 1 peek"), vec![5, 6, 5]);
    assert_eq!(ints("4 toalt 1 depth"), vec![1]);
    assert_eq!(ints("11 depth"), vec![0]);
}

#[test]
fn alt_stack_round_trip() {
    assert_eq!(ints("1 toalt 2 fromalt"), vec![2, 1]);
    assert!(matches!(
        run_expect_err("fromalt"),
        VMError::StackUnderflow { stack: "alt", .. }
    ));
}

#[test]
fn stack_ops_validate_operands() {
    assert!(matches!(
        run_expect_err("12 depth"),
        VMError::InvalidStack { selector: 12, .. }
    ));
    assert!(matches!(
        run_expect_err("-1 depth"),
        VMError::InvalidStack { selector: -1, .. }
    ));
    assert!(matches!(
        run_expect_err("0 -1 roll"),
        VMError::Range { instruction: "roll", .. }
    ));
    assert!(matches!(
        run_expect_err("1 0 3 roll"),
        VMError::StackUnderflow { stack: "data", .. }
    ));
    assert!(matches!(
        run_expect_err("0 0 peek"),
        VMError::StackUnderflow { .. }
    ));
}

#[test]
fn effect_stacks_refuse_reordering() {
    for sel in [2, 4, 6, 8, 9, 10, 11] {
        for op in ["roll", "bury", "reverse"] {
            assert!(
                matches!(
                    run_expect_err(&format!("{sel} 0 {op}")),
                    VMError::IllegalStackOp { .. }
                ),
                "{op} on {sel}"
            );
        }
    }
}

#[test]
fn value_stack_can_be_reordered() {
    let vm = run_vm(&format!("{ISSUE_100} 30 split 3 1 roll"));
    let amounts: Vec<i64> = entries(&vm, StackId::Value)
        .into_iter()
        .map(|e| match e {
            Entry::Value(v) => v.amount,
            other => panic!("{other:?}"),
        })
        .collect();
    assert_eq!(amounts, vec![30, 70]);
    for (entry, id) in entries(&vm, StackId::Value)
        .iter()
        .zip(ids(&vm, StackId::Value))
    {
        assert_eq!(entry.id(), id);
    }
}

#[test]
fn peek_on_entry_stack_copies_the_tuple() {
    let vm = run_vm(r#""00"x 0 5 [] nonce 7 0 peek"#);
    let top = vm.stacks().data.items().last().cloned().unwrap();
    let Item::Tuple(tuple) = top else {
        panic!("expected tuple");
    };
    assert_eq!(tuple[0], bytes(b"anchor"));
    assert_eq!(ids(&vm, StackId::Anchor).len(), 1);
}

// ==================== Comparison / boolean ====================

#[test]
fn equality_is_permissive() {
    assert_eq!(ints("3 3 equal"), vec![1]);
    assert_eq!(ints(r#"3 "03"x equal"#), vec![0]);
    assert_eq!(ints(r#""ab"x "ab"x equal"#), vec![1]);
    assert_eq!(ints("{1} {1} equal"), vec![0]);
}

#[test]
fn boolean_ops() {
    assert_eq!(ints("0 not 5 not"), vec![1, 0]);
    assert_eq!(ints("2 3 and 0 3 and"), vec![1, 0]);
    assert_eq!(ints("0 0 or 0 9 or"), vec![0, 1]);
    assert_eq!(ints("3 2 gt 2 3 gt 2 2 gt"), vec![1, 0, 0]);
    assert_eq!(ints("2 2 ge 1 2 ge"), vec![1, 0]);
}

// ==================== Arithmetic ====================

#[test]
fn arithmetic_basics() {
    assert_eq!(ints("2 3 add 2 3 sub 4 -5 mul"), vec![5, -1, -20]);
    assert_eq!(ints("-7 2 div -7 2 mod"), vec![-3, -1]);
    assert_eq!(ints("-9 abs 9 negate"), vec![9, -9]);
    assert_eq!(ints("1 62 lshift -8 1 rshift"), vec![1 << 62, -4]);
    assert_eq!(ints("minusone"), vec![-1]);
}

#[test]
fn arithmetic_boundaries_fail_instead_of_wrapping() {
    let max = i64::MAX;
    let min = i64::MIN;
    for src in [
        format!("{max} 1 add"),
        format!("{min} 1 sub"),
        format!("{} 2 mul", 1i64 << 62),
        format!("{min} -1 div"),
        format!("{min} -1 mod"),
        "1 0 div".to_string(),
        "1 0 mod".to_string(),
        "1 63 lshift".to_string(),
        "1 64 lshift".to_string(),
        "1 -1 rshift".to_string(),
    ] {
        assert!(
            matches!(run_expect_err(&src), VMError::Arithmetic { .. }),
            "{src}"
        );
    }
    assert!(matches!(
        run_expect_err(&format!("{min} abs")),
        VMError::Range { instruction: "abs", .. }
    ));
    assert!(matches!(
        run_expect_err(&format!("{min} negate")),
        VMError::Range { .. }
    ));
    assert_eq!(ints(&format!("{max} abs")), vec![max]);
}

#[test]
fn operand_types_are_checked() {
    assert!(matches!(
        run_expect_err(r#""aa"x 1 add"#),
        VMError::TypeMismatch {
            instruction: "add",
            expected: "int",
            actual: "bytes"
        }
    ));
    assert!(matches!(
        run_expect_err("add"),
        VMError::StackUnderflow { .. }
    ));
}

// ==================== Bitwise ====================

#[test]
fn bitwise_on_ints() {
    assert_eq!(
        ints("12 10 bitand 12 10 bitor 12 10 bitxor 0 bitnot"),
        vec![8, 14, 6, -1]
    );
}

#[test]
fn bitwise_on_bytes() {
    assert_eq!(data(r#""0f"x "ff"x bitand"#), vec![bytes(&[0x0f])]);
    assert_eq!(data(r#""00ff"x bitnot"#), vec![bytes(&[0xff, 0x00])]);
    assert_eq!(data(r#""f0"x "0f"x bitor"#), vec![bytes(&[0xff])]);
    assert_eq!(data(r#""ff"x "0f"x bitxor"#), vec![bytes(&[0xf0])]);
    assert!(matches!(
        run_expect_err(r#""00"x "0000"x bitand"#),
        VMError::InvalidOperand { .. }
    ));
    assert!(matches!(
        run_expect_err(r#"1 "01"x bitand"#),
        VMError::TypeMismatch { .. }
    ));
    assert!(matches!(
        run_expect_err("{} bitnot"),
        VMError::TypeMismatch { .. }
    ));
}

// ==================== Strings ====================

#[test]
fn cat_slice_len() {
    assert_eq!(
        data(r#""ab"x "cd"x cat"#),
        vec![bytes(&[0xab, 0xcd])]
    );
    assert_eq!(
        data(r#""abcdef"x 1 3 slice"#),
        vec![bytes(&[0xcd, 0xef])]
    );
    assert_eq!(data(r#""ab"x 1 1 slice"#), vec![bytes(&[])]);
    assert_eq!(ints(r#""abcd"x len {1, 2, 3} len"#), vec![2, 3]);
}

#[test]
fn slice_bounds_are_checked() {
    for src in [
        r#""ab"x 1 3 slice"#,
        r#""ab"x 2 1 slice"#,
        r#""ab"x -1 1 slice"#,
    ] {
        assert!(
            matches!(run_expect_err(src), VMError::Range { .. }),
            "{src}"
        );
    }
    assert!(matches!(
        run_expect_err("1 len"),
        VMError::TypeMismatch { .. }
    ));
}

// ==================== Encoding / tuples ====================

#[test]
fn encode_produces_an_executable_push() {
    assert_eq!(
        data("300 encode"),
        vec![bytes(&Item::Int(300).encode())]
    );
    assert_eq!(ints("300 encode exec"), vec![300]);
    assert_eq!(
        data(r#"{1, "aa"x} encode exec"#),
        vec![Item::tuple([Item::Int(1), bytes(&[0xaa])])]
    );
}

#[test]
fn varint_decodes_exactly_one_value() {
    assert_eq!(ints(r#""ac02"x varint"#), vec![300]);
    assert!(matches!(
        run_expect_err(r#""ac0200"x varint"#),
        VMError::BadVarint { .. }
    ));
    assert!(matches!(
        run_expect_err(r#""8000"x varint"#),
        VMError::BadVarint { .. }
    ));
    assert!(matches!(
        run_expect_err(r#""80"x varint"#),
        VMError::TruncatedInput { .. }
    ));
}

#[test]
fn tuple_untuple_field_type() {
    assert_eq!(
        data("1 2 2 tuple"),
        vec![Item::tuple([Item::Int(1), Item::Int(2)])]
    );
    assert_eq!(data("0 tuple"), vec![Item::tuple([])]);
    assert_eq!(ints("{7, 8} untuple"), vec![7, 8, 2]);
    assert_eq!(ints("{7, 8} 1 field"), vec![8]);
    assert_eq!(ints(r#"1 type "aa"x type {} type"#), vec![0, 1, 2]);
    assert!(matches!(
        run_expect_err("{7} 1 field"),
        VMError::Range { .. }
    ));
    assert!(matches!(
        run_expect_err("{7} -1 field"),
        VMError::Range { .. }
    ));
    assert!(matches!(
        run_expect_err("-1 tuple"),
        VMError::Range { .. }
    ));
    assert!(matches!(
        run_expect_err("1 2 tuple"),
        VMError::StackUnderflow { .. }
    ));
}

// ==================== Cryptography ====================

#[test]
fn hash_functions() {
    assert_eq!(
        data(r#"""x sha256"#),
        vec![bytes(
            &hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap()
        )]
    );
    assert_eq!(
        data(r#"""x sha3"#),
        vec![bytes(
            &hex::decode("a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a")
                .unwrap()
        )]
    );
    assert_eq!(data("5 vmhash"), vec![Item::from(Item::Int(5).id())]);
}

fn checksig_source(sig: &[u8], msg: &[u8], key: &[u8]) -> String {
    format!(
        r#""{}"x "{}"x "{}"x checksig"#,
        hex::encode(sig),
        hex::encode(msg),
        hex::encode(key)
    )
}

#[test]
fn checksig_verifies_and_fails_closed() {
    let msg = [7u8; 32];
    let key = public_key(1);
    assert_eq!(ints(&checksig_source(&sign(1, &msg), &msg, &key)), vec![1]);
    assert_eq!(ints(&checksig_source(&sign(2, &msg), &msg, &key)), vec![0]);
    assert_eq!(ints(&checksig_source(&[1, 2, 3], &msg, &key)), vec![0]);
    assert!(matches!(
        run_expect_err(&checksig_source(&sign(1, &msg), &msg, &key[..31])),
        VMError::InvalidOperand { .. }
    ));
    assert!(matches!(
        run_expect_err(&checksig_source(&sign(1, &msg), &msg[..8], &key)),
        VMError::InvalidOperand { .. }
    ));
}

fn multisig_source(sigs: &[[u8; 64]], msg: &[u8; 32], keys: &[[u8; 32]]) -> String {
    let mut src = String::new();
    for sig in sigs {
        src.push_str(&format!("\"{}\"x ", hex::encode(sig)));
    }
    src.push_str(&format!("\"{}\"x ", hex::encode(msg)));
    for key in keys {
        src.push_str(&format!("\"{}\"x ", hex::encode(key)));
    }
    src.push_str(&format!("{} {} checkmultisig", keys.len(), sigs.len()));
    src
}

#[test]
fn checkmultisig_matches_greedily_in_order() {
    let msg = [9u8; 32];
    let keys = [public_key(1), public_key(2), public_key(3)];
    let (s1, s3) = (sign(1, &msg), sign(3, &msg));

    assert_eq!(ints(&multisig_source(&[s1, s3], &msg, &keys)), vec![1]);
    // Same signatures in the opposite order never line up with the key walk.
    assert_eq!(ints(&multisig_source(&[s3, s1], &msg, &keys)), vec![0]);
    assert_eq!(
        ints(&multisig_source(&[s1, sign(4, &msg)], &msg, &keys)),
        vec![0]
    );
    assert_eq!(ints(&multisig_source(&[], &msg, &[])), vec![1]);
}

#[test]
fn checkmultisig_validates_counts() {
    let msg = [9u8; 32];
    for src in ["1 2 checkmultisig", "1 0 checkmultisig", "-1 0 checkmultisig"] {
        let src = format!("\"{}\"x {src}", hex::encode(msg));
        assert!(
            matches!(run_expect_err(&src), VMError::Range { .. }),
            "{src}"
        );
    }
}

#[test]
fn checkmultisig_charges_per_attempt() {
    let msg = [9u8; 32];
    let keys = [public_key(1), public_key(2), public_key(3)];
    let vm = run_vm(&multisig_source(&[sign(1, &msg)], &msg, &keys));
    assert_eq!(
        vm.runlimit().profile().get(CostCategory::Signature),
        3 * SIGNATURE_COST
    );
}

// ==================== Programs ====================

#[test]
fn exec_and_deferred_conditions() {
    assert_eq!(ints("[1 2 add] exec"), vec![3]);
    assert_eq!(ints("[5] defer 6 satisfy"), vec![6, 5]);
    assert!(matches!(
        run_expect_err("satisfy"),
        VMError::StackUnderflow {
            stack: "condition",
            ..
        }
    ));
    assert!(matches!(
        run_expect_err("1 exec"),
        VMError::TypeMismatch { .. }
    ));
}

#[test]
fn nested_frames_are_bounded() {
    assert!(matches!(
        run_expect_err("[dup exec] dup exec"),
        VMError::ResourceLimitExceeded {
            resource: "frame depth",
            ..
        }
    ));
}

#[test]
fn tuple_nesting_is_bounded() {
    let nested = |levels: usize| {
        let mut program = vec![0xF0, Instruction::Tuple as u8];
        for _ in 0..levels {
            program.extend([0xF1, Instruction::Tuple as u8]);
        }
        program
    };

    let mut vm = VM::new(DEFAULT_RUNLIMIT);
    vm.run(nested(MAX_TUPLE_DEPTH - 1)).unwrap();
    assert_eq!(vm.stacks().data.items()[0].depth(), MAX_TUPLE_DEPTH);
    assert_eq!(vm.stacks().data.items()[0].encoded_len(), 2 * MAX_TUPLE_DEPTH);

    let mut vm = VM::new(DEFAULT_RUNLIMIT);
    assert_eq!(
        vm.run(nested(200_000)),
        Err(VMError::ResourceLimitExceeded {
            resource: "tuple depth",
            used: MAX_TUPLE_DEPTH as u64 + 1,
            limit: MAX_TUPLE_DEPTH as u64,
        })
    );
    drop(vm);
}

#[test]
fn shared_tuples_are_charged_before_encoding() {
    // each level holds the previous one twice, doubling the encoding
    let source = format!("0 tuple{} encode", " dup 2 tuple".repeat(64));
    assert!(matches!(
        run_expect_err(&source),
        VMError::ResourceLimitExceeded {
            resource: "runlimit",
            ..
        }
    ));
    let source = format!("0 tuple{} vmhash", " dup 2 tuple".repeat(64));
    assert!(matches!(
        run_expect_err(&source),
        VMError::ResourceLimitExceeded {
            resource: "runlimit",
            ..
        }
    ));
}

#[test]
fn runlimit_stops_long_runs() {
    let program = assemble("$top jump:$top").unwrap();
    let mut vm = VM::new(500);
    assert!(matches!(
        vm.run(program),
        Err(VMError::ResourceLimitExceeded {
            resource: "runlimit",
            limit: 500,
            ..
        })
    ));
}

#[test]
fn tracer_is_called_before_each_instruction() {
    let mut seen = Vec::new();
    {
        let mut vm = VM::new(DEFAULT_RUNLIMIT)
            .with_tracer(|view| seen.push((view.depth, view.pc, view.op.mnemonic())));
        vm.run(assemble("[1] exec").unwrap()).unwrap();
    }
    assert_eq!(
        seen,
        vec![(1, 0, "pushdata"), (1, 3, "exec"), (2, 0, "smallint")]
    );
}

// ==================== Entries ====================

#[test]
fn nonce_creates_its_entries() {
    let vm = run_vm(r#""00"x 0 10 [] nonce"#);
    let nonce = Nonce {
        program: Bytes::empty(),
        mintime: 0,
        maxtime: 10,
        blockchain_id: Bytes::from(&[0x00]),
    };
    assert_eq!(entries(&vm, StackId::Nonce), vec![nonce.clone().into()]);
    assert_eq!(
        entries(&vm, StackId::Anchor),
        vec![Anchor { value: nonce.id() }.into()]
    );
    assert_eq!(
        entries(&vm, StackId::TimeConstraint),
        vec![MinTime { time: 0 }.into(), MaxTime { time: 10 }.into()]
    );
    assert_eq!(vm.stacks().len(StackId::Condition), 1);
    assert!(matches!(
        run_expect_err(r#""00"x 5 3 [] nonce"#),
        VMError::Range { .. }
    ));
}

#[test]
fn anchor_exposes_its_value() {
    let vm = run_vm(r#""00"x 0 10 [] nonce anchor"#);
    let nonce_id = ids(&vm, StackId::Nonce)[0];
    assert_eq!(vm.stacks().data.items(), &[Item::from(nonce_id)]);
    assert_eq!(vm.stacks().len(StackId::Anchor), 0);
}

#[test]
fn issue_consumes_an_anchor() {
    let vm = run_vm(ISSUE_100);
    assert_eq!(
        entries(&vm, StackId::Value),
        vec![issued_value().into()]
    );
    assert_eq!(vm.stacks().len(StackId::Anchor), 0);
    assert_eq!(vm.stacks().len(StackId::Condition), 0);

    assert!(matches!(
        run_expect_err("100 [] issue"),
        VMError::StackUnderflow {
            stack: "anchor",
            ..
        }
    ));
    assert!(matches!(
        run_expect_err(r#""00"x 0 10 [] nonce satisfy 0 [] issue"#),
        VMError::Range { .. }
    ));
}

#[test]
fn issuecandidate_pushes_a_tuple() {
    let vm = run_vm("[1] issuecandidate");
    let Some(Item::Tuple(tuple)) = vm.stacks().data.items().first().cloned() else {
        panic!("expected tuple");
    };
    let candidate = IssuanceCandidate::from_tuple(&tuple).unwrap();
    assert_eq!(
        candidate.asset_id,
        AssetDefinition::asset_id(&Bytes::from(&[0xF1]))
    );
}

#[test]
fn lock_records_an_output_and_contract() {
    let vm = run_vm(&format!("{ISSUE_100} [1] lock"));
    let contract = Contract::lock(&issued_value(), Bytes::from(&[0xF1]));
    assert_eq!(vm.effects().contracts, vec![contract.clone()]);
    assert_eq!(
        entries(&vm, StackId::Output),
        vec![Output {
            contract_id: contract.id()
        }
        .into()]
    );
    assert_eq!(vm.stacks().len(StackId::Value), 0);
}

#[test]
fn unlock_yields_value_and_condition() {
    let contract = Contract {
        amount: 10,
        asset_id: Hash([3; 32]),
        program: Bytes::from(&[0xF1]),
        anchor: Hash([4; 32]),
    };
    let vm = run_vm(&format!("{} unlock", lit(&Item::Tuple(contract.to_tuple()))));
    assert_eq!(
        entries(&vm, StackId::Input),
        vec![Input {
            contract_id: contract.id()
        }
        .into()]
    );
    assert_eq!(
        entries(&vm, StackId::Value),
        vec![Value {
            amount: 10,
            asset_id: contract.asset_id,
            anchor: contract.id(),
        }
        .into()]
    );
    assert_eq!(
        entries(&vm, StackId::Condition),
        vec![Condition {
            program: contract.program.clone()
        }
        .into()]
    );

    let mut bad = contract.clone();
    bad.amount = 0;
    assert!(matches!(
        run_expect_err(&format!("{} unlock", lit(&Item::Tuple(bad.to_tuple())))),
        VMError::Range { .. }
    ));
    let wrong_kind = Input { contract_id: contract.id() }.to_tuple();
    assert!(matches!(
        run_expect_err(&format!("{} unlock", lit(&Item::Tuple(wrong_kind)))),
        VMError::MalformedEntry { entry: "contract", .. }
    ));
}

#[test]
fn unlockoutput_consumes_the_matching_output() {
    let contract = Contract::lock(&issued_value(), Bytes::empty());
    let tuple = lit(&Item::Tuple(contract.to_tuple()));
    let vm = run_vm(&format!("{ISSUE_100} [] lock {tuple} unlockoutput"));
    assert_eq!(vm.stacks().len(StackId::Output), 0);
    assert_eq!(
        entries(&vm, StackId::Value),
        vec![Value {
            amount: 100,
            asset_id: contract.asset_id,
            anchor: contract.id(),
        }
        .into()]
    );

    let mut other = contract.clone();
    other.program = Bytes::from(&[0xF1]);
    let other = lit(&Item::Tuple(other.to_tuple()));
    assert!(matches!(
        run_expect_err(&format!("{ISSUE_100} [] lock {other} unlockoutput")),
        VMError::InvalidOperand { .. }
    ));
}

#[test]
fn read_records_an_input() {
    let contract = Contract {
        amount: 1,
        asset_id: Hash([1; 32]),
        program: Bytes::empty(),
        anchor: Hash([2; 32]),
    };
    let vm = run_vm(&format!("{} read", lit(&Item::Tuple(contract.to_tuple()))));
    assert_eq!(
        entries(&vm, StackId::Input),
        vec![Read {
            contract_id: contract.id()
        }
        .into()]
    );
    assert_eq!(vm.stacks().len(StackId::Value), 0);
}

#[test]
fn split_then_merge_conserves_value() {
    let vm = run_vm(&format!("{ISSUE_100} 30 split"));
    let values = entries(&vm, StackId::Value);
    let parent = issued_value();
    let parent_id = parent.id();
    assert_eq!(
        values,
        vec![
            Value {
                amount: 70,
                asset_id: parent.asset_id,
                anchor: derived_anchor("split", &[Item::from(parent_id), Item::Int(0)]),
            }
            .into(),
            Value {
                amount: 30,
                asset_id: parent.asset_id,
                anchor: derived_anchor("split", &[Item::from(parent_id), Item::Int(1)]),
            }
            .into(),
        ]
    );

    let split_ids = ids(&vm, StackId::Value);
    let vm = run_vm(&format!("{ISSUE_100} 30 split merge"));
    assert_eq!(
        entries(&vm, StackId::Value),
        vec![Value {
            amount: 100,
            asset_id: parent.asset_id,
            anchor: derived_anchor("merge", &[Item::from(split_ids[0]), Item::from(split_ids[1])]),
        }
        .into()]
    );
}

#[test]
fn split_amount_must_be_strictly_inside() {
    for amount in ["0", "100", "101", "-1"] {
        assert!(
            matches!(
                run_expect_err(&format!("{ISSUE_100} {amount} split")),
                VMError::Range { .. }
            ),
            "{amount}"
        );
    }
}

#[test]
fn merge_rejects_different_assets() {
    let src = format!(r#"{ISSUE_100} "01"x 0 10 [] nonce satisfy 5 [1 drop] issue satisfy merge"#);
    assert!(matches!(
        run_expect_err(&src),
        VMError::AssetMismatch { .. }
    ));
    assert!(matches!(
        run_expect_err(&format!("{ISSUE_100} merge")),
        VMError::StackUnderflow { stack: "value", .. }
    ));
}

#[test]
fn retire_removes_value() {
    let vm = run_vm(&format!("{ISSUE_100} retire"));
    let value = issued_value();
    assert_eq!(
        entries(&vm, StackId::Retirement),
        vec![Retirement {
            amount: value.amount,
            asset_id: value.asset_id,
            anchor: value.anchor,
        }
        .into()]
    );
}

#[test]
fn time_constraints_and_annotations() {
    let vm = run_vm(r#"50 before 20 after "6d656d6f"x annotate"#);
    assert_eq!(
        entries(&vm, StackId::TimeConstraint),
        vec![MaxTime { time: 50 }.into(), MinTime { time: 20 }.into()]
    );
    assert_eq!(
        entries(&vm, StackId::Annotation),
        vec![Annotation {
            data: Bytes::from("memo")
        }
        .into()]
    );
}

#[test]
fn summarize_drains_effect_stacks() {
    let vm = run_vm(&format!(r#"{ISSUE_100} [] lock "aa"x annotate summarize"#));
    for id in [
        StackId::Input,
        StackId::Output,
        StackId::Nonce,
        StackId::Retirement,
        StackId::TimeConstraint,
        StackId::Annotation,
    ] {
        assert_eq!(vm.stacks().len(id), 0, "{}", id.as_str());
    }
    let summaries = entries(&vm, StackId::Summary);
    let [Entry::Summary(summary)] = summaries.as_slice() else {
        panic!("expected one summary");
    };
    let contract = Contract::lock(&issued_value(), Bytes::empty());
    assert_eq!(
        summary.outputs,
        vec![Output {
            contract_id: contract.id()
        }
        .id()]
    );
    assert_eq!(summary.nonces.len(), 1);
    assert_eq!(summary.time_constraints.len(), 2);
    assert_eq!(summary.annotations.len(), 1);
    assert_eq!(ids(&vm, StackId::Summary), vec![summary.id()]);

    let effects = vm.effects();
    assert_eq!(effects.outputs.len(), 1);
    assert_eq!(effects.nonces.len(), 1);
    assert_eq!(effects.annotations.len(), 1);
}

#[test]
fn entry_creation_is_metered() {
    let vm = run_vm("1 before");
    assert_eq!(vm.runlimit().profile().get(CostCategory::Entry), ENTRY_COST);
    let encoded = MaxTime { time: 1 }.to_tuple();
    assert_eq!(
        vm.runlimit().profile().get(CostCategory::Hashing),
        Item::Tuple(encoded).encoded_len() as u64 * HASH_BYTE_COST
    );
}

#[test]
fn entry_hashing_grows_with_program_size() {
    let deferred = |len: usize| {
        let prog = lit(&Item::from(vec![0u8; len].as_slice()));
        run_vm(&format!("{prog} defer"))
            .runlimit()
            .profile()
            .get(CostCategory::Hashing)
    };
    // 4080 more payload bytes and one more length byte
    assert_eq!(deferred(4096) - deferred(16), 4081 * HASH_BYTE_COST);

    let issued = |len: usize| {
        let prog = lit(&Item::from(vec![0u8; len].as_slice()));
        run_vm(&format!(r#""00"x 0 10 [] nonce satisfy 100 {prog} issue"#))
            .runlimit()
            .profile()
            .get(CostCategory::Hashing)
    };
    // asset id and condition both hash the issuance program
    assert!(issued(4096) - issued(16) >= 2 * 4080 * HASH_BYTE_COST);
}

#[test]
fn rehashing_a_shared_program_exhausts_the_runlimit() {
    let prog = lit(&Item::from(vec![0u8; 65_536].as_slice()));
    let source = format!("{prog}{}", " dup defer".repeat(32));
    assert!(matches!(
        run_expect_err(&source),
        VMError::ResourceLimitExceeded {
            resource: "runlimit",
            ..
        }
    ));
}

#[test]
fn unlocked_outputs_leave_the_effects() {
    let contract = Contract::lock(&issued_value(), Bytes::empty());
    let tuple = lit(&Item::Tuple(contract.to_tuple()));

    let vm = run_vm(&format!("{ISSUE_100} [] lock"));
    assert_eq!(vm.effects().contracts, vec![contract]);

    let vm = run_vm(&format!(
        "{ISSUE_100} [] lock {tuple} unlockoutput satisfy retire summarize"
    ));
    let effects = vm.effects();
    assert!(effects.contracts.is_empty());
    assert!(effects.outputs.is_empty());
    assert_eq!(effects.retirements.len(), 1);
}

#[test]
fn proven_values_cannot_be_spent_as_values() {
    let proven = ProvenValue {
        value_commitment: Bytes::from(&[1]),
        asset_commitment: Bytes::from(&[2]),
        anchor: Hash([5; 32]),
    };
    assert!(matches!(
        run_expect_err(&format!("{} unlock", lit(&Item::Tuple(proven.to_tuple())))),
        VMError::MalformedEntry { .. }
    ));
}

// ==================== Properties ====================

fn arb_item() -> impl Strategy<Value = Item> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Item::Int),
        prop::collection::vec(any::<u8>(), 0..48).prop_map(|b| Item::from(b.as_slice())),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(|fields| Item::tuple(fields))
    })
}

proptest! {
    #[test]
    fn executing_an_encoding_pushes_the_item(item in arb_item()) {
        let mut vm = VM::new(DEFAULT_RUNLIMIT);
        vm.run(item.encode()).unwrap();
        prop_assert_eq!(vm.stacks().data.items(), &[item]);
    }

    #[test]
    fn add_matches_checked_add(a in any::<i64>(), b in any::<i64>()) {
        let mut vm = VM::new(DEFAULT_RUNLIMIT);
        let mut program = Item::Int(a).encode();
        program.extend(Item::Int(b).encode());
        program.push(Instruction::Add as u8);
        let result = vm.run(program);
        match a.checked_add(b) {
            Some(sum) => {
                prop_assert!(result.is_ok());
                prop_assert_eq!(vm.stacks().data.items(), &[Item::Int(sum)]);
            }
            None => {
                let is_arith = matches!(result, Err(VMError::Arithmetic { .. }));
                prop_assert!(is_arith);
            }
        }
    }
}
