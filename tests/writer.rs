//! End to end scenarios driving the class writer through its visitor
//! surface and checking the emitted class files, partly byte for byte and
//! partly by reading them back.

use class_forge::error::Result;
use class_forge::opcodes::*;
use class_forge::version::V1_8;
use class_forge::{
    AccessFlags, ClassReader, ClassVersion, ClassVisitor, ClassWriter, Compute, Constant,
    FieldVisitor, FrameItem, FrameKind, Label, MethodVisitor, ParsingOptions,
};

#[derive(Debug, Default, PartialEq)]
struct MethodRecord {
    name: String,
    descriptor: String,
    events: Vec<String>,
    frames: Vec<(FrameKind, Vec<FrameItem>, Vec<FrameItem>)>,
    max_stack: u16,
    max_locals: u16,
}

impl MethodVisitor for MethodRecord {
    fn visit_insn(&mut self, opcode: u8) -> Result<()> {
        self.events.push(format!("insn {:#x}", opcode));
        Ok(())
    }

    fn visit_var_insn(&mut self, opcode: u8, var: u16) -> Result<()> {
        self.events.push(format!("var {:#x} {}", opcode, var));
        Ok(())
    }

    fn visit_jump_insn(&mut self, opcode: u8, label: Label) -> Result<()> {
        self.events.push(format!("jump {:#x} {:?}", opcode, label));
        Ok(())
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        self.events.push(format!("label {:?}", label));
        Ok(())
    }

    fn visit_ldc_insn(&mut self, value: &Constant) -> Result<()> {
        self.events.push(format!("ldc {:?}", value));
        Ok(())
    }

    fn visit_type_insn(&mut self, opcode: u8, type_name: &str) -> Result<()> {
        self.events.push(format!("type {:#x} {}", opcode, type_name));
        Ok(())
    }

    fn visit_method_insn(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<()> {
        self.events.push(format!(
            "call {:#x} {}.{}{} itf={}",
            opcode, owner, name, descriptor, is_interface
        ));
        Ok(())
    }

    fn visit_table_switch_insn(
        &mut self,
        min: i32,
        max: i32,
        default: Label,
        labels: &[Label],
    ) -> Result<()> {
        self.events.push(format!(
            "tableswitch {}..{} default {:?} targets {}",
            min,
            max,
            default,
            labels.len()
        ));
        Ok(())
    }

    fn visit_lookup_switch_insn(
        &mut self,
        default: Label,
        keys: &[i32],
        labels: &[Label],
    ) -> Result<()> {
        self.events.push(format!(
            "lookupswitch default {:?} keys {:?} targets {}",
            default,
            keys,
            labels.len()
        ));
        Ok(())
    }

    fn visit_try_catch_block(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> Result<()> {
        self.events.push(format!(
            "trycatch {:?} {:?} {:?} {:?}",
            start, end, handler, catch_type
        ));
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        self.events.push(format!("line {} {:?}", line, start));
        Ok(())
    }

    fn visit_frame(
        &mut self,
        kind: FrameKind,
        _n_local: u16,
        locals: &[FrameItem],
        _n_stack: u16,
        stack: &[FrameItem],
    ) -> Result<()> {
        self.frames.push((kind, locals.to_vec(), stack.to_vec()));
        Ok(())
    }

    fn visit_maxs(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        self.max_stack = max_stack;
        self.max_locals = max_locals;
        Ok(())
    }
}

#[derive(Debug, Default, PartialEq)]
struct ClassRecord {
    name: String,
    super_name: Option<String>,
    fields: Vec<String>,
    methods: Vec<MethodRecord>,
}

impl ClassVisitor for ClassRecord {
    fn visit(
        &mut self,
        _version: ClassVersion,
        _access: AccessFlags,
        name: &str,
        _signature: Option<&str>,
        super_name: Option<&str>,
        _interfaces: &[&str],
    ) -> Result<()> {
        self.name = name.to_owned();
        self.super_name = super_name.map(str::to_owned);
        Ok(())
    }

    fn visit_field(
        &mut self,
        _access: AccessFlags,
        name: &str,
        descriptor: &str,
        _signature: Option<&str>,
        value: Option<&Constant>,
    ) -> Result<Option<&mut dyn FieldVisitor>> {
        self.fields.push(format!("{} {} {:?}", name, descriptor, value));
        Ok(None)
    }

    fn visit_method(
        &mut self,
        _access: AccessFlags,
        name: &str,
        descriptor: &str,
        _signature: Option<&str>,
        _exceptions: &[&str],
    ) -> Result<Option<&mut dyn MethodVisitor>> {
        self.methods.push(MethodRecord {
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            ..MethodRecord::default()
        });
        Ok(Some(self.methods.last_mut().unwrap() as &mut dyn MethodVisitor))
    }
}

fn read_back(bytes: Vec<u8>, options: ParsingOptions) -> ClassRecord {
    let reader = ClassReader::new(bytes).expect("emitted class must parse");
    let mut record = ClassRecord::default();
    reader.accept(&mut record, options).expect("replay succeeds");
    record
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn count_subsequence(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|window| *window == needle)
        .count()
}

#[test]
fn empty_method_emits_minimal_code_attribute() {
    let mut cw = ClassWriter::new(Compute::Maxs);
    cw.visit(
        V1_8,
        AccessFlags::PUBLIC | AccessFlags::SUPER,
        "com/example/Empty",
        None,
        Some("java/lang/Object"),
        &[],
    )
    .unwrap();
    {
        let mv = cw
            .visit_method(
                AccessFlags::PUBLIC | AccessFlags::STATIC,
                "nothing",
                "()V",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        mv.visit_code().unwrap();
        mv.visit_insn(RETURN).unwrap();
        mv.visit_maxs(0, 0).unwrap();
        mv.visit_end().unwrap();
    }
    cw.visit_end().unwrap();
    let bytes = cw.to_bytes().unwrap();

    // max_stack=0, max_locals=0, code_length=1, return, no exceptions, no
    // code attributes.
    let expected_code = [
        0u8, 0, 0, 0, 0, 0, 0, 1, RETURN, 0, 0, 0, 0,
    ];
    assert!(find_subsequence(&bytes, &expected_code).is_some());

    let record = read_back(bytes, ParsingOptions::empty());
    assert_eq!(record.name, "com/example/Empty");
    let method = &record.methods[0];
    assert_eq!(method.max_stack, 0);
    assert_eq!(method.max_locals, 0);
    assert!(method.frames.is_empty());
    assert_eq!(method.events.last().unwrap(), &format!("insn {:#x}", RETURN));
}

#[test]
fn forward_short_jump_patches_relative_offset() {
    let mut cw = ClassWriter::new(Compute::Maxs);
    cw.visit(
        // Version 1.6: the CFG maxs algorithm rather than the
        // frame-anchored one.
        ClassVersion::new(50, 0),
        AccessFlags::PUBLIC | AccessFlags::SUPER,
        "com/example/Fwd",
        None,
        Some("java/lang/Object"),
        &[],
    )
    .unwrap();
    {
        let mv = cw
            .visit_method(
                AccessFlags::PUBLIC | AccessFlags::STATIC,
                "branch",
                "()I",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        let target = Label::new(0);
        mv.visit_code().unwrap();
        mv.visit_insn(ICONST_0).unwrap();
        mv.visit_jump_insn(IFNE, target).unwrap();
        mv.visit_insn(ICONST_1).unwrap();
        mv.visit_label(target).unwrap();
        mv.visit_insn(IRETURN).unwrap();
        mv.visit_maxs(0, 0).unwrap();
        mv.visit_end().unwrap();
    }
    cw.visit_end().unwrap();
    let bytes = cw.to_bytes().unwrap();

    // iconst_0; ifne +4; iconst_1; ireturn; the branch lands on ireturn.
    let expected_code = [ICONST_0, IFNE, 0x00, 0x04, ICONST_1, IRETURN];
    assert!(find_subsequence(&bytes, &expected_code).is_some());

    let record = read_back(bytes, ParsingOptions::empty());
    assert_eq!(record.methods[0].max_stack, 1);
    assert_eq!(record.methods[0].max_locals, 0);
}

#[test]
fn oversized_forward_jump_round_trips_to_goto_w() {
    let mut cw = ClassWriter::new(Compute::Maxs);
    cw.visit(
        ClassVersion::new(50, 0),
        AccessFlags::PUBLIC | AccessFlags::SUPER,
        "com/example/Far",
        None,
        Some("java/lang/Object"),
        &[],
    )
    .unwrap();
    {
        let mv = cw
            .visit_method(
                AccessFlags::PUBLIC | AccessFlags::STATIC,
                "far",
                "()I",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        let target = Label::new(0);
        mv.visit_code().unwrap();
        mv.visit_insn(ICONST_0).unwrap();
        mv.visit_jump_insn(IFNE, target).unwrap();
        for _ in 0..40_000 {
            mv.visit_insn(NOP).unwrap();
        }
        mv.visit_label(target).unwrap();
        mv.visit_insn(ICONST_1).unwrap();
        mv.visit_insn(IRETURN).unwrap();
        mv.visit_maxs(0, 0).unwrap();
        mv.visit_end().unwrap();
    }
    cw.visit_end().unwrap();
    let bytes = cw.to_bytes().unwrap();

    // The rewritten form: reversed condition over a wide goto. ifne became
    // ifeq +8 followed by goto_w.
    let expected_prefix = [ICONST_0, IFEQ, 0x00, 0x08, GOTO_W, 0x00, 0x00];
    assert!(find_subsequence(&bytes, &expected_prefix).is_some());
    // No reserved internal opcodes may survive in the emitted class.
    let record = read_back(bytes, ParsingOptions::empty());
    let events = &record.methods[0].events;
    assert!(events
        .iter()
        .any(|event| event.starts_with(&format!("jump {:#x}", IFEQ))));
}

#[test]
fn constant_pool_deduplicates_across_the_class() {
    let mut cw = ClassWriter::new(Compute::Maxs);
    cw.visit(
        V1_8,
        AccessFlags::PUBLIC | AccessFlags::SUPER,
        "com/example/Dedup",
        None,
        Some("java/lang/Object"),
        &[],
    )
    .unwrap();
    cw.visit_field(
        AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::FINAL,
        "A",
        "Ljava/lang/String;",
        None,
        Some(&Constant::String("foo".to_owned())),
    )
    .unwrap();
    {
        let mv = cw
            .visit_method(
                AccessFlags::PUBLIC | AccessFlags::STATIC,
                "foo",
                "()Ljava/lang/String;",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        mv.visit_code().unwrap();
        mv.visit_ldc_insn(&Constant::String("foo".to_owned())).unwrap();
        mv.visit_insn(ARETURN).unwrap();
        mv.visit_maxs(0, 0).unwrap();
        mv.visit_end().unwrap();
    }
    cw.visit_end().unwrap();
    let bytes = cw.to_bytes().unwrap();

    // Exactly one CONSTANT_Utf8_info for "foo", shared by the field value,
    // the ldc operand and the method name.
    let utf8_foo = [1u8, 0, 3, b'f', b'o', b'o'];
    assert_eq!(count_subsequence(&bytes, &utf8_foo), 1);
}

#[test]
fn computed_frames_for_if_else_merge() {
    let mut cw = ClassWriter::new(Compute::Frames);
    cw.visit(
        V1_8,
        AccessFlags::PUBLIC | AccessFlags::SUPER,
        "com/example/Branchy",
        None,
        Some("java/lang/Object"),
        &[],
    )
    .unwrap();
    {
        let mv = cw
            .visit_method(
                AccessFlags::PUBLIC | AccessFlags::STATIC,
                "pick",
                "(I)I",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        let l = Label::new(0);
        let e = Label::new(1);
        mv.visit_code().unwrap();
        mv.visit_var_insn(ILOAD, 0).unwrap();
        mv.visit_jump_insn(IFEQ, l).unwrap();
        mv.visit_insn(ICONST_1).unwrap();
        mv.visit_jump_insn(GOTO, e).unwrap();
        mv.visit_label(l).unwrap();
        mv.visit_insn(ICONST_2).unwrap();
        mv.visit_label(e).unwrap();
        mv.visit_insn(IRETURN).unwrap();
        mv.visit_maxs(0, 0).unwrap();
        mv.visit_end().unwrap();
    }
    cw.visit_end().unwrap();
    let bytes = cw.to_bytes().unwrap();

    let record = read_back(bytes.clone(), ParsingOptions::empty());
    let method = &record.methods[0];
    assert_eq!(method.max_stack, 1);
    assert_eq!(method.max_locals, 1);
    // Compressed forms: same_frame at the else branch, then
    // same_locals_1_stack_item with an int at the merge point.
    assert_eq!(method.frames.len(), 2);
    assert_eq!(method.frames[0].0, FrameKind::Same);
    assert_eq!(method.frames[1].0, FrameKind::Same1);
    assert_eq!(method.frames[1].2, vec![FrameItem::Integer]);

    // Expanded view agrees.
    let expanded = read_back(bytes, ParsingOptions::EXPAND_FRAMES);
    let frames = &expanded.methods[0].frames;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].0, FrameKind::New);
    assert_eq!(frames[1].1, vec![FrameItem::Integer]);
    assert_eq!(frames[1].2, vec![FrameItem::Integer]);
}

#[test]
fn constructor_initialization_reaches_emitted_frames() {
    let mut cw = ClassWriter::new(Compute::Frames);
    cw.visit(
        V1_8,
        AccessFlags::PUBLIC | AccessFlags::SUPER,
        "com/example/Alloc",
        None,
        Some("java/lang/Object"),
        &[],
    )
    .unwrap();
    {
        let mv = cw
            .visit_method(
                AccessFlags::PUBLIC | AccessFlags::STATIC,
                "alloc",
                "()V",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        let l = Label::new(0);
        mv.visit_code().unwrap();
        mv.visit_type_insn(NEW, "com/example/Foo").unwrap();
        mv.visit_insn(DUP).unwrap();
        mv.visit_method_insn(INVOKESPECIAL, "com/example/Foo", "<init>", "()V", false)
            .unwrap();
        mv.visit_var_insn(ASTORE, 1).unwrap();
        mv.visit_jump_insn(GOTO, l).unwrap();
        mv.visit_label(l).unwrap();
        mv.visit_insn(RETURN).unwrap();
        mv.visit_maxs(0, 0).unwrap();
        mv.visit_end().unwrap();
    }
    cw.visit_end().unwrap();
    let bytes = cw.to_bytes().unwrap();

    let record = read_back(bytes, ParsingOptions::EXPAND_FRAMES);
    let frames = &record.methods[0].frames;
    assert_eq!(frames.len(), 1);
    // After the constructor call the stored local is the concrete class, not
    // an uninitialized type.
    assert_eq!(
        frames[0].1,
        vec![
            FrameItem::Top,
            FrameItem::Object("com/example/Foo".to_owned())
        ]
    );
    assert!(frames[0].2.is_empty());
}

#[test]
fn rich_class_survives_a_structural_round_trip() {
    let mut cw = ClassWriter::new(Compute::Maxs);
    cw.visit(
        ClassVersion::new(50, 0),
        AccessFlags::PUBLIC | AccessFlags::SUPER,
        "com/example/Rich",
        None,
        Some("java/lang/Object"),
        &["java/io/Serializable"],
    )
    .unwrap();
    cw.visit_source(Some("Rich.java"), None).unwrap();
    cw.visit_field(
        AccessFlags::PRIVATE | AccessFlags::FINAL,
        "count",
        "I",
        None,
        Some(&Constant::Integer(42)),
    )
    .unwrap();
    {
        let mv = cw
            .visit_method(
                AccessFlags::PUBLIC | AccessFlags::STATIC,
                "pick",
                "(I)I",
                None,
                &["java/lang/IllegalStateException"],
            )
            .unwrap()
            .unwrap();
        mv.visit_code().unwrap();
        let one = Label::new(0);
        let other = Label::new(1);
        let done = Label::new(2);
        mv.visit_var_insn(ILOAD, 0).unwrap();
        mv.visit_lookup_switch_insn(other, &[1], &[one]).unwrap();
        mv.visit_label(one).unwrap();
        mv.visit_insn(ICONST_1).unwrap();
        mv.visit_jump_insn(GOTO, done).unwrap();
        mv.visit_label(other).unwrap();
        mv.visit_insn(ICONST_0).unwrap();
        mv.visit_label(done).unwrap();
        mv.visit_insn(IRETURN).unwrap();
        mv.visit_maxs(0, 0).unwrap();
        mv.visit_end().unwrap();
    }
    cw.visit_end().unwrap();
    let first = cw.to_bytes().unwrap();

    // Read the emitted class and write it again through a fresh writer.
    let reader = ClassReader::new(first.clone()).unwrap();
    let mut rewriter = ClassWriter::new(Compute::Nothing);
    reader.accept(&mut rewriter, ParsingOptions::empty()).unwrap();
    let second = rewriter.to_bytes().unwrap();

    let record_first = read_back(first, ParsingOptions::empty());
    let record_second = read_back(second, ParsingOptions::empty());
    assert_eq!(record_first, record_second);
}

#[test]
fn seeded_writer_copies_untouched_methods_verbatim() {
    let mut cw = ClassWriter::new(Compute::Maxs);
    cw.visit(
        V1_8,
        AccessFlags::PUBLIC | AccessFlags::SUPER,
        "com/example/Copied",
        None,
        Some("java/lang/Object"),
        &[],
    )
    .unwrap();
    {
        let mv = cw
            .visit_method(
                AccessFlags::PUBLIC | AccessFlags::STATIC,
                "answer",
                "()I",
                None,
                &[],
            )
            .unwrap()
            .unwrap();
        mv.visit_code().unwrap();
        mv.visit_int_insn(BIPUSH, 42).unwrap();
        mv.visit_insn(IRETURN).unwrap();
        mv.visit_maxs(0, 0).unwrap();
        mv.visit_end().unwrap();
    }
    cw.visit_end().unwrap();
    let original = cw.to_bytes().unwrap();

    let reader = ClassReader::new(original.clone()).unwrap();
    let mut transformer = ClassWriter::from_reader(&reader, Compute::Nothing).unwrap();
    reader
        .accept(&mut transformer, ParsingOptions::empty())
        .unwrap();
    let copied = transformer.to_bytes().unwrap();

    // The original method_info bytes must appear unchanged in the output.
    let code_shape = [BIPUSH, 42, IRETURN];
    let method_start = find_subsequence(&original, &code_shape).unwrap();
    let original_window = &original[method_start..method_start + 3];
    assert!(find_subsequence(&copied, original_window).is_some());

    let record_original = read_back(original, ParsingOptions::empty());
    let record_copied = read_back(copied, ParsingOptions::empty());
    assert_eq!(record_original, record_copied);
}
