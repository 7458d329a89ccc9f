//! Writer for the `Module`, `ModulePackages` and `ModuleMainClass` class
//! attributes (JVMS §4.7.25–27).

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytes::ByteVector;
use crate::error::Result;
use crate::opcodes::AccessFlags;
use crate::symbol::SymbolTable;
use crate::visitor::ModuleVisitor;

pub struct ModuleWriter {
    symbols: Rc<RefCell<SymbolTable>>,
    module_name_index: u16,
    module_flags: u16,
    module_version_index: u16,

    requires: ByteVector,
    requires_count: u16,
    exports: ByteVector,
    exports_count: u16,
    opens: ByteVector,
    opens_count: u16,
    uses: ByteVector,
    uses_count: u16,
    provides: ByteVector,
    provides_count: u16,

    packages: ByteVector,
    package_count: u16,
    main_class_index: u16,
}

impl ModuleWriter {
    pub(crate) fn new(
        symbols: Rc<RefCell<SymbolTable>>,
        name: &str,
        access: AccessFlags,
        version: Option<&str>,
    ) -> Result<Self> {
        let (module_name_index, module_version_index) = {
            let mut table = symbols.borrow_mut();
            let name_index = table.add_constant_module(name)?;
            let version_index = match version {
                Some(version) => table.add_constant_utf8(version)?,
                None => 0,
            };
            (name_index, version_index)
        };
        Ok(ModuleWriter {
            symbols,
            module_name_index,
            module_flags: access.file_bits(),
            module_version_index,
            requires: ByteVector::new(),
            requires_count: 0,
            exports: ByteVector::new(),
            exports_count: 0,
            opens: ByteVector::new(),
            opens_count: 0,
            uses: ByteVector::new(),
            uses_count: 0,
            provides: ByteVector::new(),
            provides_count: 0,
            packages: ByteVector::new(),
            package_count: 0,
            main_class_index: 0,
        })
    }

    /// Number of class attributes this writer will emit (Module, plus
    /// ModulePackages and ModuleMainClass when present).
    pub(crate) fn attribute_count(&self) -> u16 {
        1 + (self.package_count > 0) as u16 + (self.main_class_index > 0) as u16
    }

    pub(crate) fn put(&self, out: &mut ByteVector) -> Result<()> {
        let mut table = self.symbols.borrow_mut();

        let module_attribute_length = 16
            + self.requires.len()
            + self.exports.len()
            + self.opens.len()
            + self.uses.len()
            + self.provides.len();
        out.put_u16(table.add_constant_utf8("Module")?);
        out.put_u32(module_attribute_length as u32);
        out.put_u16(self.module_name_index)
            .put_u16(self.module_flags)
            .put_u16(self.module_version_index);
        out.put_u16(self.requires_count);
        out.put_bytes(self.requires.as_slice());
        out.put_u16(self.exports_count);
        out.put_bytes(self.exports.as_slice());
        out.put_u16(self.opens_count);
        out.put_bytes(self.opens.as_slice());
        out.put_u16(self.uses_count);
        out.put_bytes(self.uses.as_slice());
        out.put_u16(self.provides_count);
        out.put_bytes(self.provides.as_slice());

        if self.package_count > 0 {
            out.put_u16(table.add_constant_utf8("ModulePackages")?);
            out.put_u32(2 + self.packages.len() as u32);
            out.put_u16(self.package_count);
            out.put_bytes(self.packages.as_slice());
        }
        if self.main_class_index > 0 {
            out.put_u16(table.add_constant_utf8("ModuleMainClass")?);
            out.put_u32(2);
            out.put_u16(self.main_class_index);
        }
        Ok(())
    }
}

impl ModuleVisitor for ModuleWriter {
    fn visit_main_class(&mut self, main_class: &str) -> Result<()> {
        self.main_class_index = self.symbols.borrow_mut().add_constant_class(main_class)?;
        Ok(())
    }

    fn visit_package(&mut self, package: &str) -> Result<()> {
        let index = self.symbols.borrow_mut().add_constant_package(package)?;
        self.packages.put_u16(index);
        self.package_count += 1;
        Ok(())
    }

    fn visit_require(
        &mut self,
        module: &str,
        access: AccessFlags,
        version: Option<&str>,
    ) -> Result<()> {
        let mut table = self.symbols.borrow_mut();
        let module_index = table.add_constant_module(module)?;
        let version_index = match version {
            Some(version) => table.add_constant_utf8(version)?,
            None => 0,
        };
        self.requires
            .put_u16(module_index)
            .put_u16(access.file_bits())
            .put_u16(version_index);
        self.requires_count += 1;
        Ok(())
    }

    fn visit_export(&mut self, package: &str, access: AccessFlags, modules: &[&str]) -> Result<()> {
        let mut table = self.symbols.borrow_mut();
        let package_index = table.add_constant_package(package)?;
        self.exports
            .put_u16(package_index)
            .put_u16(access.file_bits())
            .put_u16(modules.len() as u16);
        for module in modules {
            let index = table.add_constant_module(module)?;
            self.exports.put_u16(index);
        }
        self.exports_count += 1;
        Ok(())
    }

    fn visit_open(&mut self, package: &str, access: AccessFlags, modules: &[&str]) -> Result<()> {
        let mut table = self.symbols.borrow_mut();
        let package_index = table.add_constant_package(package)?;
        self.opens
            .put_u16(package_index)
            .put_u16(access.file_bits())
            .put_u16(modules.len() as u16);
        for module in modules {
            let index = table.add_constant_module(module)?;
            self.opens.put_u16(index);
        }
        self.opens_count += 1;
        Ok(())
    }

    fn visit_use(&mut self, service: &str) -> Result<()> {
        let index = self.symbols.borrow_mut().add_constant_class(service)?;
        self.uses.put_u16(index);
        self.uses_count += 1;
        Ok(())
    }

    fn visit_provide(&mut self, service: &str, providers: &[&str]) -> Result<()> {
        let mut table = self.symbols.borrow_mut();
        let service_index = table.add_constant_class(service)?;
        self.provides
            .put_u16(service_index)
            .put_u16(providers.len() as u16);
        for provider in providers {
            let index = table.add_constant_class(provider)?;
            self.provides.put_u16(index);
        }
        self.provides_count += 1;
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}
