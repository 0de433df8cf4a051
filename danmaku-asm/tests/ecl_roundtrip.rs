//! Assembly / disassembly round trips for the stage-event language.

use danmaku_asm::ecl::EclProgram;
use danmaku_asm::ir::Node;
use danmaku_asm::{MnemonicMap, Version};
use pretty_assertions::assert_eq;
use rstest::rstest;

/// Compile text, serialise, disassemble, serialise again: the bytes must
/// not move, and the disassembly must itself survive a dump/parse cycle.
fn assert_stable(version: Version, source: &str) -> EclProgram {
    let program = EclProgram::parse(version, source, None).unwrap();
    let bytes = program.write().unwrap();

    let reread = EclProgram::read(version, &bytes).unwrap();
    let bytes2 = reread.write().unwrap();
    assert_eq!(bytes, bytes2, "bytes moved across a disassembly cycle");

    let text = reread.dump(None);
    let reparsed = EclProgram::parse(version, &text, None).unwrap();
    let bytes3 = reparsed.write().unwrap();
    assert_eq!(bytes, bytes3, "bytes moved across a text cycle");

    for (a, b) in reread.subs.iter().zip(&reparsed.subs) {
        assert_eq!(a.nodes, b.nodes, "IR moved across a text cycle");
    }

    reread
}

#[test]
fn minimal_program_round_trips() {
    let program = assert_stable(Version::Th10, "sub Sub1() { 0: ins_40(16); 0: ins_0(); }");
    let sub = &program.subs[0];
    assert_eq!(sub.name, "Sub1");

    let instrs: Vec<_> = sub.instrs().collect();
    assert_eq!(instrs.len(), 2);
    assert_eq!(instrs[0].opcode, 40);
    assert_eq!(instrs[1].opcode, 0);
    assert_eq!(instrs[0].offset, 16);
    assert_eq!(instrs[1].offset, 36);
}

#[test]
fn jump_targets_get_exactly_one_label() {
    let source = "sub Main() { ins_12(skip, 0); ins_17(1); skip: ins_0(); }";
    let program = assert_stable(Version::Th10, source);
    let sub = &program.subs[0];

    let labels: Vec<_> = sub
        .nodes
        .iter()
        .filter(|n| matches!(n, Node::Label(_)))
        .collect();
    assert_eq!(labels.len(), 1);

    // The label sits immediately before the last instruction.
    let position = sub.nodes.iter().position(|n| matches!(n, Node::Label(_))).unwrap();
    assert!(matches!(&sub.nodes[position + 1], Node::Instr(i) if i.opcode == 0));

    // And it resolves to that instruction's offset.
    let target = sub.instrs().last().unwrap().offset;
    assert_eq!(sub.labels[0].offset, target);
}

#[test]
fn backward_jumps_resolve_negative() {
    let source = "sub Loop() { top: ins_17(1); ins_12(top, 0); }";
    let program = EclProgram::parse(Version::Th10, source, None).unwrap();
    let bytes = program.write().unwrap();

    let reread = EclProgram::read(Version::Th10, &bytes).unwrap();
    let sub = &reread.subs[0];
    // `top` binds to the first instruction.
    assert_eq!(sub.labels[0].offset, 16);
    assert_eq!(reread.write().unwrap(), bytes);
}

#[test]
fn times_and_ranks_survive() {
    let source = "\
sub S()
{
    ins_0();
    10: !EN ins_17(3);
    +5: ins_17(4);
    -1: ins_17(5);
    20: ins_0();
}";
    let program = assert_stable(Version::Th10, source);
    let sub = &program.subs[0];
    let times: Vec<i32> = sub.instrs().map(|i| i.time).collect();
    assert_eq!(times, vec![0, 10, 15, -1, 20]);
    let ranks: Vec<u8> = sub.instrs().map(|i| i.rank).collect();
    assert_eq!(ranks, vec![0xff, 0xf3, 0xf3, 0xf3, 0xf3]);
}

#[test]
fn includes_and_string_params_survive() {
    let source = "\
anim { \"stage1.anm\"; \"effects.anm\"; }
ecli { \"common.ecl\"; }

sub Boss()
{
    ins_11(\"BossCard1\", _SS 5, _ff 0.5f);
    ins_16(\"Child\", 1);
}";
    let program = assert_stable(Version::Th10, source);
    assert_eq!(program.anim_refs, vec!["stage1.anm", "effects.anm"]);
    assert_eq!(program.ecli_refs, vec!["common.ecl"]);
}

#[test]
fn stack_references_and_masks_survive() {
    let source = "sub S() { ins_43($A); ins_12(end, $B); end: ins_0(); }";
    let program = assert_stable(Version::Th10, source);
    let instrs: Vec<_> = program.subs[0].instrs().collect();
    assert_eq!(instrs[0].stack_ref_mask(), 0b1);
    // The jump offset itself is immediate, the condition is a register.
    assert_eq!(instrs[1].stack_ref_mask(), 0b10);
}

#[rstest]
#[case::th06(Version::Th06, "sub Sub1() { ins_2(7, 7); 30: ins_5(0, 1.5f); }")]
#[case::th07(Version::Th07, "sub Sub1() { ins_7(0, 2.0f); ins_12(1, 2, 3, 4); }")]
#[case::th08(Version::Th08, "sub Sub1() { ins_4(1, 2); +8: ins_25(0.5f, 1.0f, 2.0f); }")]
#[case::th09(Version::Th09, "sub Sub1() { ins_8(1.0f, 2.0f); ins_29(3); }")]
fn legacy_programs_round_trip(#[case] version: Version, #[case] source: &str) {
    assert_stable(version, source);
}

#[rstest]
#[case::th11(Version::Th11, "sub S() { ins_86(1, 2, 3, 4, 5); }")]
#[case::th12(Version::Th12, "sub S() { ins_40(8); ins_81(0.0f, 0.0f, 1.0f, 1.0f); }")]
#[case::th13(Version::Th13, "sub S() { ins_18(1); ins_22(2, \"x\"); }")]
#[case::th14(Version::Th14, "sub S() { ins_336(1); ins_40(4); }")]
fn newer_tables_round_trip(#[case] version: Version, #[case] source: &str) {
    assert_stable(version, source);
}

#[test]
fn unknown_opcodes_survive_as_raw_bytes() {
    // Assemble a known program, then patch an opcode the tables do not
    // list; the disassembler must keep its body verbatim.
    let program = EclProgram::parse(Version::Th10, "sub S() { ins_17(257); }", None).unwrap();
    let mut bytes = program.write().unwrap();
    let ins17 = 17u16.to_le_bytes();
    let at = bytes
        .windows(2)
        .position(|w| w == ins17)
        .expect("assembled opcode not found");
    bytes[at..at + 2].copy_from_slice(&9999u16.to_le_bytes());

    let reread = EclProgram::read(Version::Th10, &bytes).unwrap();
    assert_eq!(reread.write().unwrap(), bytes);

    // But assembling the same opcode from source is refused.
    let err = EclProgram::parse(Version::Th10, "sub S() { ins_9999(1); }", None).unwrap_err();
    assert!(matches!(err, danmaku_asm::AsmError::UnknownOpcode { opcode: 9999, .. }));
}

#[test]
fn mnemonics_rename_in_both_directions() {
    let map = MnemonicMap::load("!ins_names\n12 jump\n17 delete\n", "eclmap").unwrap();

    let source = "sub S() { jump(out, 0); out: delete(1); }";
    let program = EclProgram::parse(Version::Th10, source, Some(&map)).unwrap();
    let opcodes: Vec<u16> = program.subs[0].instrs().map(|i| i.opcode).collect();
    assert_eq!(opcodes, vec![12, 17]);

    let bytes = program.write().unwrap();
    let text = EclProgram::read(Version::Th10, &bytes).unwrap().dump(Some(&map));
    assert!(text.contains("jump("), "dump should use the mnemonic: {text}");
    assert!(text.contains("delete(1)"), "dump should use the mnemonic: {text}");
}

#[test]
fn sub_order_and_count_survive() {
    let source = "\
sub A() { ins_0(); }
sub B() { ins_17(1); ins_17(2); }
sub C() { ins_0(); }";
    let program = assert_stable(Version::Th10, source);
    let names: Vec<&str> = program.subs.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B", "C"]);
}
