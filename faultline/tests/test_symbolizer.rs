use faultline::symbolization::Symbolizer;

#[test]
fn test_symbolizer_creation() {
    // Test that we can create a symbolizer for a binary
    let binary_path = env!("CARGO_BIN_EXE_faultline");

    println!("Testing symbolizer creation on: {binary_path}");

    let symbolizer = Symbolizer::new(binary_path);
    assert!(symbolizer.is_ok(), "Failed to create symbolizer: {:?}", symbolizer.err());
    assert_eq!(symbolizer.unwrap().object_count(), 1);
}

#[test]
fn test_symbolizer_rejects_missing_binary() {
    let err = Symbolizer::new("/nonexistent/faultline").err().expect("missing file is an error");
    assert!(err.to_string().contains("Failed to read binary file"));
}

#[test]
fn test_symbolizer_resolves_function_names() {
    // Test that the symbolizer can resolve addresses to function names
    let binary_path = env!("CARGO_BIN_EXE_faultline");
    let symbolizer = Symbolizer::new(binary_path).expect("Failed to create symbolizer");

    // Get function addresses from nm
    let Ok(nm_output) = std::process::Command::new("nm").args(["-C", binary_path]).output() else {
        println!("nm not available, skipping");
        return;
    };
    let symbols = String::from_utf8_lossy(&nm_output.stdout);

    let mut exact = 0;
    let mut with_location = 0;
    let mut attempts = 0;

    for line in symbols.lines().filter(|line| line.contains(" T ")).take(20) {
        let Some(addr) = line.split_whitespace().next().and_then(|a| u64::from_str_radix(a, 16).ok())
        else {
            continue;
        };
        attempts += 1;

        let frame = symbolizer.resolve(addr);
        assert_eq!(frame.addr, addr);
        // Function starts resolve with no offset; untyped labels may land
        // inside an enclosing function instead
        if let (Some(name), 0) = (frame.name, frame.offset) {
            exact += 1;
            if let (Some(file), Some(line_no)) = (frame.file, frame.line) {
                println!("  {name} at {file}:{line_no}");
                with_location += 1;
            }
        }
    }

    assert!(attempts > 0, "nm listed no text symbols for {binary_path}");
    assert!(exact > 0, "none of {attempts} nm symbols resolved to a function start");
    println!("{exact}/{attempts} resolved exactly, {with_location} with source locations");
}

#[test]
fn test_symbolizer_resolves_drill_main() {
    let binary_path = env!("CARGO_BIN_EXE_faultline");
    let symbolizer = Symbolizer::new(binary_path).expect("Failed to create symbolizer");

    let Ok(nm_output) = std::process::Command::new("nm").args(["-C", binary_path]).output() else {
        println!("nm not available, skipping");
        return;
    };
    let symbols = String::from_utf8_lossy(&nm_output.stdout);

    // The drill's run() survives in every build profile
    let Some(addr) = symbols
        .lines()
        .find(|line| line.ends_with(" faultline::run"))
        .and_then(|line| u64::from_str_radix(line.split_whitespace().next()?, 16).ok())
    else {
        println!("faultline::run not in symbol table, skipping");
        return;
    };

    let frame = symbolizer.resolve_return_address(addr + 4);
    assert_eq!(frame.name, Some("faultline::run"));
    assert_eq!(frame.offset, 4);
}
