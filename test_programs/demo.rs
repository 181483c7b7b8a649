use std::hint::black_box;

static mut CALLS: u32 = 0;
static GREETING: &str = "Starting calculation...";

#[inline(never)]
fn demo_add(a: i32, b: i32) -> i32 {
    unsafe {
        CALLS += 1;
    }
    a + b
}

#[inline(never)]
fn demo_multiply(a: i32, b: i32) -> i32 {
    let mut product = 0;
    for _ in 0..b {
        product = demo_add(product, a);
    }
    product
}

#[inline(never)]
fn demo_calculate(x: i32, y: i32) -> i32 {
    let sum = demo_add(x, y);
    let product = {
        let scaled = demo_multiply(x, y);
        scaled + 1
    };
    sum + product
}

fn main() {
    println!("{}", GREETING);
    let result = demo_calculate(black_box(3), black_box(4));
    println!("Result: {} after {} calls", result, unsafe { CALLS });
}
