//! UEFI System Table, Boot Services, and Runtime Services.
//!
//! The full function-pointer layout is declared even though the loader
//! calls only a handful of entries; truncating the struct would misplace
//! every later member. Pointers are bare `unsafe extern "efiapi" fn`
//! values (not `Option`) to preserve the C layout.

use core::ffi::c_void;

use crate::memory::{EfiAllocateType, EfiMemoryType, MemoryMap};
use crate::protocol::simple_text::SimpleTextOutputProtocol;
use crate::protocol::simple_text_input::SimpleTextInputProtocol;
use crate::{EfiEvent, EfiGuid, EfiHandle, EfiPhysicalAddress, EfiStatus, EfiTpl};

/// Common header for all UEFI tables.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TableHeader {
    /// A 64-bit signature identifying the table that follows.
    pub signature: u64,
    /// The UEFI specification revision this table conforms to.
    pub revision: u32,
    /// The size of the entire table including this header.
    pub header_size: u32,
    /// The 32-bit CRC of the entire table.
    pub crc32: u32,
    /// Reserved; zero.
    pub reserved: u32,
}

/// An entry in the configuration table array.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ConfigurationTable {
    /// The GUID identifying the table.
    pub vendor_guid: EfiGuid,
    /// A pointer to the vendor-specific table data.
    pub vendor_table: *mut c_void,
}

/// The UEFI System Table, handed to the application entry point.
#[repr(C)]
pub struct SystemTable {
    /// The table header.
    pub header: TableHeader,
    /// NUL-terminated UCS-2 firmware vendor string.
    pub firmware_vendor: *const u16,
    /// The firmware revision.
    pub firmware_revision: u32,
    /// Handle of the active console input device.
    pub console_in_handle: EfiHandle,
    /// The console input protocol.
    pub console_in: *mut SimpleTextInputProtocol,
    /// Handle of the active console output device.
    pub console_out_handle: EfiHandle,
    /// The console output protocol.
    pub console_out: *mut SimpleTextOutputProtocol,
    /// Handle of the standard error device.
    pub standard_error_handle: EfiHandle,
    /// The standard error output protocol.
    pub standard_error: *mut SimpleTextOutputProtocol,
    /// The Runtime Services table.
    pub runtime_services: *mut RuntimeServices,
    /// The Boot Services table.
    pub boot_services: *mut BootServices,
    /// Number of configuration table entries.
    pub number_of_table_entries: usize,
    /// The configuration table array.
    pub configuration_table: *mut ConfigurationTable,
}

impl SystemTable {
    /// Returns the boot services table.
    ///
    /// # Safety
    ///
    /// `ExitBootServices` must not have been called, and the pointer must
    /// be the one the firmware provided.
    #[must_use]
    pub unsafe fn boot_services(&self) -> &BootServices {
        unsafe { &*self.boot_services }
    }

    /// Returns the configuration table entries as a slice.
    ///
    /// # Safety
    ///
    /// The pointer/count pair must be the one the firmware provided.
    #[must_use]
    pub unsafe fn configuration_tables(&self) -> &[ConfigurationTable] {
        unsafe {
            core::slice::from_raw_parts(self.configuration_table, self.number_of_table_entries)
        }
    }

    /// Searches the configuration tables for `guid`.
    ///
    /// # Safety
    ///
    /// Same requirements as [`SystemTable::configuration_tables`].
    #[must_use]
    pub unsafe fn find_config_table(&self, guid: &EfiGuid) -> Option<*mut c_void> {
        unsafe { self.configuration_tables() }
            .iter()
            .find(|entry| entry.vendor_guid == *guid)
            .map(|entry| entry.vendor_table)
    }
}

/// Timer delay type for `SetTimer`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerDelay {
    /// Cancel a previously set timer.
    Cancel = 0,
    /// Periodic timer.
    Periodic = 1,
    /// One-shot timer.
    Relative = 2,
}

/// Interface type for `InstallProtocolInterface`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    /// Native interface.
    NativeInterface = 0,
}

/// Search type for `LocateHandle`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateSearchType {
    /// All handles in the handle database.
    AllHandles = 0,
    /// Handles matching a registration key.
    ByRegisterNotify = 1,
    /// Handles supporting a specific protocol.
    ByProtocol = 2,
}

/// Reset type for `ResetSystem`.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    /// Power-cycle equivalent reset.
    Cold = 0,
    /// Warm reset.
    Warm = 1,
    /// Platform shutdown.
    Shutdown = 2,
    /// Platform-specific reset.
    PlatformSpecific = 3,
}

/// The UEFI Boot Services table.
///
/// Available until `ExitBootServices`; afterwards only runtime services
/// remain and every pointer in here is poison.
#[repr(C)]
pub struct BootServices {
    /// The table header.
    pub header: TableHeader,

    // ── Task priority ────────────────────────────────────────────
    /// Raises the task priority level.
    pub raise_tpl: unsafe extern "efiapi" fn(new_tpl: EfiTpl) -> EfiTpl,
    /// Restores the task priority level.
    pub restore_tpl: unsafe extern "efiapi" fn(old_tpl: EfiTpl),

    // ── Memory ───────────────────────────────────────────────────
    /// Allocates memory pages.
    pub allocate_pages: unsafe extern "efiapi" fn(
        alloc_type: EfiAllocateType,
        memory_type: EfiMemoryType,
        pages: usize,
        memory: *mut EfiPhysicalAddress,
    ) -> EfiStatus,
    /// Frees memory pages.
    pub free_pages:
        unsafe extern "efiapi" fn(memory: EfiPhysicalAddress, pages: usize) -> EfiStatus,
    /// Returns the current memory map.
    pub get_memory_map: unsafe extern "efiapi" fn(
        memory_map_size: *mut usize,
        memory_map: *mut u8,
        map_key: *mut usize,
        descriptor_size: *mut usize,
        descriptor_version: *mut u32,
    ) -> EfiStatus,
    /// Allocates pool memory.
    pub allocate_pool: unsafe extern "efiapi" fn(
        pool_type: EfiMemoryType,
        size: usize,
        buffer: *mut *mut c_void,
    ) -> EfiStatus,
    /// Frees pool memory.
    pub free_pool: unsafe extern "efiapi" fn(buffer: *mut c_void) -> EfiStatus,

    // ── Events and timers ────────────────────────────────────────
    /// Creates an event.
    pub create_event: unsafe extern "efiapi" fn(
        event_type: u32,
        notify_tpl: EfiTpl,
        notify_function: Option<unsafe extern "efiapi" fn(event: EfiEvent, context: *mut c_void)>,
        notify_context: *mut c_void,
        event: *mut EfiEvent,
    ) -> EfiStatus,
    /// Arms or cancels a timer event.
    pub set_timer: unsafe extern "efiapi" fn(
        event: EfiEvent,
        timer_type: TimerDelay,
        trigger_time: u64,
    ) -> EfiStatus,
    /// Blocks until one of the events is signaled.
    pub wait_for_event: unsafe extern "efiapi" fn(
        number_of_events: usize,
        event: *mut EfiEvent,
        index: *mut usize,
    ) -> EfiStatus,
    /// Signals an event.
    pub signal_event: unsafe extern "efiapi" fn(event: EfiEvent) -> EfiStatus,
    /// Closes an event.
    pub close_event: unsafe extern "efiapi" fn(event: EfiEvent) -> EfiStatus,
    /// Polls an event's signaled state.
    pub check_event: unsafe extern "efiapi" fn(event: EfiEvent) -> EfiStatus,

    // ── Protocol handlers ────────────────────────────────────────
    /// Installs a protocol interface on a handle.
    pub install_protocol_interface: unsafe extern "efiapi" fn(
        handle: *mut EfiHandle,
        protocol: *const EfiGuid,
        interface_type: InterfaceType,
        interface: *mut c_void,
    ) -> EfiStatus,
    /// Reinstalls a protocol interface on a handle.
    pub reinstall_protocol_interface: unsafe extern "efiapi" fn(
        handle: EfiHandle,
        protocol: *const EfiGuid,
        old_interface: *mut c_void,
        new_interface: *mut c_void,
    ) -> EfiStatus,
    /// Removes a protocol interface from a handle.
    pub uninstall_protocol_interface: unsafe extern "efiapi" fn(
        handle: EfiHandle,
        protocol: *const EfiGuid,
        interface: *mut c_void,
    ) -> EfiStatus,
    /// Queries a handle for a protocol interface.
    pub handle_protocol: unsafe extern "efiapi" fn(
        handle: EfiHandle,
        protocol: *const EfiGuid,
        interface: *mut *mut c_void,
    ) -> EfiStatus,
    /// Reserved; null.
    pub reserved: *mut c_void,
    /// Registers for notification when a protocol appears.
    pub register_protocol_notify: unsafe extern "efiapi" fn(
        protocol: *const EfiGuid,
        event: EfiEvent,
        registration: *mut *mut c_void,
    ) -> EfiStatus,
    /// Returns handles supporting a protocol.
    pub locate_handle: unsafe extern "efiapi" fn(
        search_type: LocateSearchType,
        protocol: *const EfiGuid,
        search_key: *mut c_void,
        buffer_size: *mut usize,
        buffer: *mut EfiHandle,
    ) -> EfiStatus,
    /// Locates a device-path node supporting a protocol.
    pub locate_device_path: unsafe extern "efiapi" fn(
        protocol: *const EfiGuid,
        device_path: *mut *mut c_void,
        device: *mut EfiHandle,
    ) -> EfiStatus,
    /// Adds or removes a configuration table entry.
    pub install_configuration_table:
        unsafe extern "efiapi" fn(guid: *const EfiGuid, table: *mut c_void) -> EfiStatus,

    // ── Images ───────────────────────────────────────────────────
    /// Loads an EFI image.
    pub load_image: unsafe extern "efiapi" fn(
        boot_policy: bool,
        parent_image_handle: EfiHandle,
        device_path: *mut c_void,
        source_buffer: *const c_void,
        source_size: usize,
        image_handle: *mut EfiHandle,
    ) -> EfiStatus,
    /// Transfers control to a loaded image.
    pub start_image: unsafe extern "efiapi" fn(
        image_handle: EfiHandle,
        exit_data_size: *mut usize,
        exit_data: *mut *mut u16,
    ) -> EfiStatus,
    /// Terminates the calling image.
    pub exit: unsafe extern "efiapi" fn(
        image_handle: EfiHandle,
        exit_status: EfiStatus,
        exit_data_size: usize,
        exit_data: *mut u16,
    ) -> EfiStatus,
    /// Unloads an image.
    pub unload_image: unsafe extern "efiapi" fn(image_handle: EfiHandle) -> EfiStatus,
    /// Freezes the memory map and terminates boot services.
    pub exit_boot_services:
        unsafe extern "efiapi" fn(image_handle: EfiHandle, map_key: usize) -> EfiStatus,

    // ── Miscellaneous ────────────────────────────────────────────
    /// Returns a monotonically increasing count.
    pub get_next_monotonic_count: unsafe extern "efiapi" fn(count: *mut u64) -> EfiStatus,
    /// Busy-waits for the given number of microseconds.
    pub stall: unsafe extern "efiapi" fn(microseconds: usize) -> EfiStatus,
    /// Arms the system watchdog.
    pub set_watchdog_timer: unsafe extern "efiapi" fn(
        timeout: usize,
        watchdog_code: u64,
        data_size: usize,
        watchdog_data: *const u16,
    ) -> EfiStatus,

    // ── Driver support ───────────────────────────────────────────
    /// Connects drivers to a controller.
    pub connect_controller: unsafe extern "efiapi" fn(
        controller_handle: EfiHandle,
        driver_image_handle: *mut EfiHandle,
        remaining_device_path: *mut c_void,
        recursive: bool,
    ) -> EfiStatus,
    /// Disconnects drivers from a controller.
    pub disconnect_controller: unsafe extern "efiapi" fn(
        controller_handle: EfiHandle,
        driver_image_handle: EfiHandle,
        child_handle: EfiHandle,
    ) -> EfiStatus,

    // ── Open/close protocol ──────────────────────────────────────
    /// Opens a protocol on a handle with attributes.
    pub open_protocol: unsafe extern "efiapi" fn(
        handle: EfiHandle,
        protocol: *const EfiGuid,
        interface: *mut *mut c_void,
        agent_handle: EfiHandle,
        controller_handle: EfiHandle,
        attributes: u32,
    ) -> EfiStatus,
    /// Closes a previously opened protocol.
    pub close_protocol: unsafe extern "efiapi" fn(
        handle: EfiHandle,
        protocol: *const EfiGuid,
        agent_handle: EfiHandle,
        controller_handle: EfiHandle,
    ) -> EfiStatus,
    /// Lists the agents that have a protocol open.
    pub open_protocol_information: unsafe extern "efiapi" fn(
        handle: EfiHandle,
        protocol: *const EfiGuid,
        entry_buffer: *mut *mut c_void,
        entry_count: *mut usize,
    ) -> EfiStatus,

    // ── Library services ─────────────────────────────────────────
    /// Lists the protocols installed on a handle.
    pub protocols_per_handle: unsafe extern "efiapi" fn(
        handle: EfiHandle,
        protocol_buffer: *mut *mut *const EfiGuid,
        protocol_buffer_count: *mut usize,
    ) -> EfiStatus,
    /// Returns an allocated buffer of handles supporting a protocol.
    pub locate_handle_buffer: unsafe extern "efiapi" fn(
        search_type: LocateSearchType,
        protocol: *const EfiGuid,
        search_key: *mut c_void,
        num_handles: *mut usize,
        buffer: *mut *mut EfiHandle,
    ) -> EfiStatus,
    /// Finds the first interface matching a protocol GUID.
    pub locate_protocol: unsafe extern "efiapi" fn(
        protocol: *const EfiGuid,
        registration: *mut c_void,
        interface: *mut *mut c_void,
    ) -> EfiStatus,
    /// Installs multiple protocol interfaces (variadic in C; unused).
    pub install_multiple_protocol_interfaces: *mut c_void,
    /// Uninstalls multiple protocol interfaces (variadic in C; unused).
    pub uninstall_multiple_protocol_interfaces: *mut c_void,

    // ── CRC and memory utilities ─────────────────────────────────
    /// Computes a CRC-32.
    pub calculate_crc32: unsafe extern "efiapi" fn(
        data: *const c_void,
        data_size: usize,
        crc32: *mut u32,
    ) -> EfiStatus,
    /// Copies memory.
    pub copy_mem:
        unsafe extern "efiapi" fn(destination: *mut c_void, source: *const c_void, length: usize),
    /// Fills memory.
    pub set_mem: unsafe extern "efiapi" fn(buffer: *mut c_void, size: usize, value: u8),
    /// Creates an event in an event group.
    pub create_event_ex: unsafe extern "efiapi" fn(
        event_type: u32,
        notify_tpl: EfiTpl,
        notify_function: Option<unsafe extern "efiapi" fn(event: EfiEvent, context: *mut c_void)>,
        notify_context: *const c_void,
        event_group: *const EfiGuid,
        event: *mut EfiEvent,
    ) -> EfiStatus,
}

impl BootServices {
    /// Finds the first interface registered for `P`'s GUID.
    ///
    /// # Safety
    ///
    /// Boot services must still be active.
    pub unsafe fn locate_protocol<P: crate::protocol::Protocol>(
        &self,
    ) -> Result<&'static mut P::Raw, EfiStatus> {
        let mut interface: *mut c_void = core::ptr::null_mut();
        unsafe {
            (self.locate_protocol)(&P::GUID, core::ptr::null_mut(), &mut interface)
                .to_result()?;
        }
        if interface.is_null() {
            return Err(EfiStatus::NOT_FOUND);
        }
        Ok(unsafe { &mut *interface.cast::<P::Raw>() })
    }

    /// Queries `handle` for `P`'s interface.
    ///
    /// # Safety
    ///
    /// Boot services must still be active and `handle` valid.
    pub unsafe fn handle_protocol<P: crate::protocol::Protocol>(
        &self,
        handle: EfiHandle,
    ) -> Result<&'static mut P::Raw, EfiStatus> {
        let mut interface: *mut c_void = core::ptr::null_mut();
        unsafe {
            (self.handle_protocol)(handle, &P::GUID, &mut interface).to_result()?;
        }
        if interface.is_null() {
            return Err(EfiStatus::NOT_FOUND);
        }
        Ok(unsafe { &mut *interface.cast::<P::Raw>() })
    }

    /// Allocates `pages` pages of `LoaderData` memory with the given
    /// strategy. Contents are undefined.
    ///
    /// # Safety
    ///
    /// Boot services must still be active.
    pub unsafe fn allocate_pages(
        &self,
        alloc_type: EfiAllocateType,
        pages: usize,
        address_hint: EfiPhysicalAddress,
    ) -> Result<EfiPhysicalAddress, EfiStatus> {
        let mut address = address_hint;
        unsafe {
            (self.allocate_pages)(alloc_type, EfiMemoryType::LoaderData, pages, &mut address)
                .to_result()?;
        }
        Ok(address)
    }

    /// Frees pages from [`BootServices::allocate_pages`].
    ///
    /// # Safety
    ///
    /// Boot services must still be active and the range must come from
    /// `allocate_pages`.
    pub unsafe fn free_pages(
        &self,
        address: EfiPhysicalAddress,
        pages: usize,
    ) -> Result<(), EfiStatus> {
        unsafe { (self.free_pages)(address, pages).to_result() }
    }

    /// Snapshots the memory map into `buf`.
    ///
    /// # Safety
    ///
    /// Boot services must still be active.
    pub unsafe fn memory_map<'buf>(
        &self,
        buf: &'buf mut [u8],
    ) -> Result<MemoryMap<'buf>, EfiStatus> {
        let mut map_size = buf.len();
        let mut map_key = 0usize;
        let mut descriptor_size = 0usize;
        let mut descriptor_version = 0u32;
        unsafe {
            (self.get_memory_map)(
                &mut map_size,
                buf.as_mut_ptr(),
                &mut map_key,
                &mut descriptor_size,
                &mut descriptor_version,
            )
            .to_result()?;
        }
        Ok(MemoryMap::new(
            &buf[..map_size],
            map_key,
            descriptor_size,
            descriptor_version,
        ))
    }

    /// Busy-waits for `microseconds`.
    ///
    /// # Safety
    ///
    /// Boot services must still be active.
    pub unsafe fn stall(&self, microseconds: usize) {
        unsafe {
            let _ = (self.stall)(microseconds);
        }
    }
}

/// The UEFI Runtime Services table.
///
/// Only the members up to `ResetSystem` are declared with full
/// signatures; the loader never calls past that point.
#[repr(C)]
pub struct RuntimeServices {
    /// The table header.
    pub header: TableHeader,
    /// Returns the current time.
    pub get_time: *mut c_void,
    /// Sets the current time.
    pub set_time: *mut c_void,
    /// Returns the wakeup alarm time.
    pub get_wakeup_time: *mut c_void,
    /// Sets the wakeup alarm.
    pub set_wakeup_time: *mut c_void,
    /// Switches runtime services to virtual addressing.
    pub set_virtual_address_map: *mut c_void,
    /// Converts a pointer for virtual addressing.
    pub convert_pointer: *mut c_void,
    /// Reads a UEFI variable.
    pub get_variable: *mut c_void,
    /// Enumerates UEFI variable names.
    pub get_next_variable_name: *mut c_void,
    /// Writes a UEFI variable.
    pub set_variable: *mut c_void,
    /// Returns the platform's next high-monotonic count.
    pub get_next_high_monotonic_count: *mut c_void,
    /// Resets the system.
    pub reset_system: unsafe extern "efiapi" fn(
        reset_type: ResetType,
        reset_status: EfiStatus,
        data_size: usize,
        reset_data: *const c_void,
    ) -> !,
}
