use std::fs;
use std::process::exit;

use clap::{App, Arg};

use class_forge::error::Result;
use class_forge::{
    AccessFlags, ClassReader, ClassVersion, ClassVisitor, ClassWriter, Compute, Constant,
    FieldVisitor, MethodVisitor, ParsingOptions,
};

fn main() {
    pretty_env_logger::init();

    let app = App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::with_name("class")
                .takes_value(true)
                .required(true)
                .help("Class file to read"),
        )
        .arg(
            Arg::with_name("members")
                .short("m")
                .long("members")
                .help("Print fields and methods"),
        )
        .arg(
            Arg::with_name("roundtrip")
                .short("r")
                .long("roundtrip")
                .help("Re-emit the class through a writer and report the size"),
        )
        .get_matches();

    let path = app.value_of("class").unwrap();
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("unable to read {}: {}", path, err);
            exit(1);
        }
    };

    if let Err(err) = dump(bytes, app.is_present("members"), app.is_present("roundtrip")) {
        eprintln!("unable to parse {}: {}", path, err);
        exit(1);
    }
}

fn dump(bytes: Vec<u8>, members: bool, roundtrip: bool) -> Result<()> {
    let reader = ClassReader::new(bytes)?;
    println!(
        "{} (version {}.{})",
        reader.class_name()?,
        reader.version().major(),
        reader.version().minor()
    );
    if let Some(super_name) = reader.super_name()? {
        println!("  extends {}", super_name);
    }
    for interface in reader.interfaces()? {
        println!("  implements {}", interface);
    }

    if members {
        let mut printer = MemberPrinter;
        reader.accept(&mut printer, ParsingOptions::SKIP_CODE)?;
    }

    if roundtrip {
        let mut writer = ClassWriter::from_reader(&reader, Compute::Nothing)?;
        reader.accept(&mut writer, ParsingOptions::empty())?;
        let emitted = writer.to_bytes()?;
        println!("  round trip: {} bytes", emitted.len());
    }
    Ok(())
}

struct MemberPrinter;

impl ClassVisitor for MemberPrinter {
    fn visit(
        &mut self,
        _version: ClassVersion,
        access: AccessFlags,
        _name: &str,
        _signature: Option<&str>,
        _super_name: Option<&str>,
        _interfaces: &[&str],
    ) -> Result<()> {
        println!("  access: {:?}", access);
        Ok(())
    }

    fn visit_field(
        &mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        _signature: Option<&str>,
        value: Option<&Constant>,
    ) -> Result<Option<&mut dyn FieldVisitor>> {
        match value {
            Some(value) => println!("  field  {} {} [{:?}] = {:?}", name, descriptor, access, value),
            None => println!("  field  {} {} [{:?}]", name, descriptor, access),
        }
        Ok(None)
    }

    fn visit_method(
        &mut self,
        access: AccessFlags,
        name: &str,
        descriptor: &str,
        _signature: Option<&str>,
        _exceptions: &[&str],
    ) -> Result<Option<&mut dyn MethodVisitor>> {
        println!("  method {}{} [{:?}]", name, descriptor, access);
        Ok(None)
    }
}
