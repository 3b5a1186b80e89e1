//! File-system scenarios: round trips, extension, hierarchy, concurrent
//! directory traffic, deferred removal, persistence across reboot and
//! the consistency check.

use std::sync::Arc;
use std::sync::Mutex;

use machine::config::DEFAULT_NUM_SECTORS;
use machine::Machine;

use nos::fs::{FsError, MAX_FILE_SIZE, NUM_DATAPTR, NUM_DIRECT};
use nos::kernel::Kernel;
use nos::thread::Thread;

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| seed.wrapping_add((i % 253) as u8)).collect()
}

#[test]
fn create_write_close_open_read() {
    let kernel = Kernel::boot_default();
    let fs = &kernel.file_system;

    let payload = pattern(20, 3);
    fs.create("pepe", payload.len()).unwrap();

    {
        let file = fs.open("pepe").unwrap();
        assert_eq!(file.write(&payload), payload.len());
    }

    let file = fs.open("pepe").unwrap();
    assert_eq!(file.length(), payload.len());
    let mut back = vec![0u8; payload.len()];
    assert_eq!(file.read_at(&mut back, 0), payload.len());
    assert_eq!(back, payload);
    drop(file);

    fs.remove("pepe").unwrap();
    assert_eq!(fs.open("pepe").unwrap_err(), FsError::NotFound);
    assert!(fs.check());
}

/// Writing far past the end grows the file through the free map; reads
/// at any offset up to the new size return what was written.
#[test]
fn writes_extend_the_file() {
    let kernel = Kernel::boot_default();
    let fs = &kernel.file_system;

    let initial = 20;
    let final_size = 1024;
    fs.create("pepe", initial).unwrap();

    let file = fs.open("pepe").unwrap();
    let payload = pattern(final_size, 11);
    assert_eq!(file.write_at(&payload, 0), final_size);
    assert_eq!(file.length(), final_size);

    let mut tail = vec![0u8; initial];
    assert_eq!(file.read_at(&mut tail, final_size - initial), initial);
    assert_eq!(tail, payload[final_size - initial..]);

    // Shrinking requests are a no-op.
    assert_eq!(file.write_at(&payload[..8], 0), 8);
    assert_eq!(file.length(), final_size);

    drop(file);
    fs.remove("pepe").unwrap();
    assert!(fs.check());
}

/// A file large enough to need the double-indirect path, with reads
/// crossing the direct/single/double boundaries.
#[test]
fn double_indirect_files() {
    use machine::config::SECTOR_SIZE;

    let kernel = Kernel::boot_default();
    let fs = &kernel.file_system;
    let free_before = fs.free_sector_count();

    let size = (NUM_DIRECT + NUM_DATAPTR + 12) * SECTOR_SIZE + 40;
    fs.create("grande", size).unwrap();

    let file = fs.open("grande").unwrap();
    let payload = pattern(size, 99);
    assert_eq!(file.write_at(&payload, 0), size);

    for offset in [
        0,
        NUM_DIRECT * SECTOR_SIZE - 3,
        (NUM_DIRECT + NUM_DATAPTR) * SECTOR_SIZE - 5,
        size - 17,
    ] {
        let mut chunk = vec![0u8; 10.min(size - offset)];
        let want = chunk.len();
        assert_eq!(file.read_at(&mut chunk, offset), want);
        assert_eq!(chunk, payload[offset..offset + want]);
    }
    drop(file);

    assert!(fs.check());
    fs.remove("grande").unwrap();
    assert_eq!(fs.free_sector_count(), free_before);
    assert!(fs.check());
}

/// The largest representable file allocates and deallocates cleanly on a
/// disk big enough to hold it; one byte more is refused outright.
#[test]
fn max_file_size_boundary() {
    let kernel = Kernel::boot(Machine::new(4096), true);
    let fs = &kernel.file_system;
    let free_before = fs.free_sector_count();

    assert_eq!(
        fs.create("huge", MAX_FILE_SIZE + 1).unwrap_err(),
        FsError::TooLarge
    );

    fs.create("big", MAX_FILE_SIZE).unwrap();
    fs.remove("big").unwrap();
    assert_eq!(fs.free_sector_count(), free_before);
    assert!(fs.check());
}

/// On the default small disk a maximum-size file cannot fit, and the
/// failed create leaves no trace.
#[test]
fn create_without_space_fails_cleanly() {
    let kernel = Kernel::boot_default();
    let fs = &kernel.file_system;
    let free_before = fs.free_sector_count();

    assert_eq!(
        fs.create("big", MAX_FILE_SIZE).unwrap_err(),
        FsError::NoSpace
    );
    assert_eq!(fs.free_sector_count(), free_before);
    assert!(fs.list("/").unwrap().is_empty());
    assert!(fs.check());
}

#[test]
fn mkdir_rmdir_round_trip() {
    let kernel = Kernel::boot_default();
    let fs = &kernel.file_system;

    let free_before = fs.free_sector_count();
    let listing_before = fs.list("/").unwrap();

    fs.make_directory("/dir").unwrap();
    assert!(fs.list("/").unwrap().contains(&"dir".to_string()));
    assert!(fs.list("/dir").unwrap().is_empty());

    fs.remove_directory("/dir").unwrap();
    assert_eq!(fs.free_sector_count(), free_before);
    assert_eq!(fs.list("/").unwrap(), listing_before);
    assert!(fs.check());
}

#[test]
fn hierarchy_and_relative_paths() {
    let kernel = Kernel::boot_default();
    let fs = &kernel.file_system;

    fs.make_directory("/a").unwrap();
    fs.make_directory("/a/b").unwrap();
    fs.create("/a/b/f", 10).unwrap();

    assert_eq!(fs.list("/a/b").unwrap(), ["f"]);
    assert_eq!(
        fs.make_directory("/a/b").unwrap_err(),
        FsError::AlreadyExists
    );
    assert_eq!(fs.create("/a/f/x", 0).unwrap_err(), FsError::NotFound);

    // Relative resolution starts at the thread's current directory.
    fs.change_directory("/a").unwrap();
    fs.create("g", 0).unwrap();
    assert!(fs.list("/a").unwrap().contains(&"g".to_string()));
    let file = fs.open("b/f").unwrap();
    assert_eq!(file.length(), 10);
    drop(file);

    // A populated directory refuses to go away; an empty one does not.
    assert_eq!(fs.remove_directory("/a/b").unwrap_err(), FsError::NotEmpty);
    fs.remove("/a/b/f").unwrap();
    fs.remove_directory("/a/b").unwrap();
    fs.remove("g").unwrap();

    fs.change_directory("/").unwrap();
    fs.remove_directory("/a").unwrap();
    assert!(fs.check());
}

/// Two threads create and remove ten files each with disjoint names;
/// afterwards the root is empty and the free map is back to its
/// pre-state.
#[test]
fn concurrent_file_creation() {
    let kernel = Kernel::boot_default();
    let fs = kernel.file_system.clone();
    let sched = kernel.scheduler.clone();

    let free_before = fs.free_sector_count();
    let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let mut workers = Vec::new();
    for prefix in ["a", "b"] {
        let worker = Thread::new(&sched, prefix, true);
        let fs = fs.clone();
        let sched_for_child = sched.clone();
        let failures = failures.clone();
        worker.fork(&sched, move || {
            for i in 0..10 {
                let name = format!("{}{}", prefix, i);
                if fs.create(&name, 30).is_err() {
                    failures.lock().unwrap().push(format!("create {}", name));
                }
                sched_for_child.yield_now();
            }
            for i in 0..10 {
                let name = format!("{}{}", prefix, i);
                if fs.remove(&name).is_err() {
                    failures.lock().unwrap().push(format!("remove {}", name));
                }
                sched_for_child.yield_now();
            }
        });
        workers.push(worker);
    }

    for worker in &workers {
        assert_eq!(worker.join(), 0);
    }

    let failures = failures.lock().unwrap().clone();
    assert!(failures.is_empty(), "{:?}", failures);
    assert!(fs.list("/").unwrap().is_empty());
    assert_eq!(fs.free_sector_count(), free_before);
    assert!(fs.check());
}

/// Removing an open file defers the space reclamation until last close;
/// the name disappears immediately.
#[test]
fn deferred_removal_of_open_files() {
    let kernel = Kernel::boot_default();
    let fs = kernel.file_system.clone();
    let sched = kernel.scheduler.clone();

    let free_before = fs.free_sector_count();
    fs.create("f", 0).unwrap();

    let handle = fs.open("f").unwrap();

    let remover = Thread::new(&sched, "remover", true);
    let removed: Arc<Mutex<Option<Result<(), FsError>>>> = Arc::new(Mutex::new(None));
    {
        let fs = fs.clone();
        let removed = removed.clone();
        remover.fork(&sched, move || {
            *removed.lock().unwrap() = Some(fs.remove("f"));
        });
    }
    assert_eq!(remover.join(), 0);
    assert_eq!(*removed.lock().unwrap(), Some(Ok(())));

    // The name is gone, but the handle still works.
    assert_eq!(fs.open("f").unwrap_err(), FsError::NotFound);
    let payload = pattern(200, 42);
    assert_eq!(handle.write_at(&payload, 0), payload.len());
    let mut back = vec![0u8; payload.len()];
    assert_eq!(handle.read_at(&mut back, 0), payload.len());
    assert_eq!(back, payload);

    // Last close returns every sector to the free map.
    drop(handle);
    assert_eq!(fs.free_sector_count(), free_before);
    assert!(fs.check());
}

/// Producer and consumer share one on-disk file through separate
/// handles; the shared-file lock keeps every byte intact while the two
/// interleave.
#[test]
fn concurrent_access_through_shared_file() {
    const FILE_LEN: usize = 15;

    let kernel = Kernel::boot_default();
    let fs = kernel.file_system.clone();
    let sched = kernel.scheduler.clone();

    fs.create("prodcons", FILE_LEN).unwrap();

    let producer = Thread::new(&sched, "producer", true);
    {
        let fs = fs.clone();
        let sched_for_child = sched.clone();
        producer.fork(&sched, move || {
            let file = fs.open("prodcons").unwrap();
            for i in 0..10u8 {
                let byte = [b'0' + i];
                file.lock_file();
                file.write(&byte);
                file.unlock_file();
                sched_for_child.yield_now();
            }
        });
    }

    let consumer = Thread::new(&sched, "consumer", true);
    let seen: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let fs = fs.clone();
        let sched_for_child = sched.clone();
        let seen = seen.clone();
        consumer.fork(&sched, move || {
            let file = fs.open("prodcons").unwrap();
            let mut contents = [0u8; FILE_LEN];
            loop {
                file.lock_file();
                file.read_at(&mut contents, 0);
                file.unlock_file();
                if contents[9] != 0 {
                    break;
                }
                sched_for_child.yield_now();
            }
            seen.lock().unwrap().extend_from_slice(&contents[..10]);
        });
    }

    producer.join();
    consumer.join();
    assert_eq!(&*seen.lock().unwrap(), b"0123456789");

    fs.remove("prodcons").unwrap();
    assert!(fs.check());
}

/// A flushed image survives a reboot on the same disk.
#[test]
fn data_survives_reboot() {
    let machine = Machine::new(DEFAULT_NUM_SECTORS);
    let disk = machine.disk.clone();
    let payload = pattern(300, 77);

    {
        let kernel = Kernel::boot(machine, true);
        let fs = &kernel.file_system;
        fs.make_directory("/boot").unwrap();
        fs.create("/boot/msg", 0).unwrap();
        let file = fs.open("/boot/msg").unwrap();
        assert_eq!(file.write_at(&payload, 0), payload.len());
        drop(file);
        fs.flush();
    }

    let kernel = Kernel::boot(Machine::with_disk(disk), false);
    let fs = &kernel.file_system;
    assert!(fs.check());
    let file = fs.open("/boot/msg").unwrap();
    let mut back = vec![0u8; payload.len()];
    assert_eq!(file.read_at(&mut back, 0), payload.len());
    assert_eq!(back, payload);
}
