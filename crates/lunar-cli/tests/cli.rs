use assert_cmd::prelude::*;
use lunar_core::opcode::rk_ask;
use lunar_core::{OpCode, Proto, ProtoBuilder, UpvalueDesc};
use predicates::prelude::*;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::{tempdir, TempDir};

fn main_chunk(max_stack: u8) -> ProtoBuilder {
    let mut b = ProtoBuilder::new("@script.lua").vararg().max_stack(max_stack);
    b.upvalue("_ENV", UpvalueDesc::Stack(0));
    b.set_line(1);
    b
}

fn write_chunk(dir: &TempDir, name: &str, proto: &Proto) -> Result<PathBuf, Box<dyn Error>> {
    let path = dir.path().join(name);
    fs::write(&path, lunar_chunk::dump(proto))?;
    Ok(path)
}

/// `print("sum", 1 + 2)`
fn hello() -> Proto {
    let mut b = main_chunk(3);
    let print = rk_ask(b.str("print"));
    let sum = b.str("sum");
    let (k1, k2) = (rk_ask(b.int(1)), rk_ask(b.int(2)));
    b.abc(OpCode::GetTabUp, 0, 0, print);
    b.abx(OpCode::LoadK, 1, sum);
    b.abc(OpCode::Add, 2, k1, k2);
    b.abc(OpCode::Call, 0, 3, 1);
    b.abc(OpCode::Return, 0, 1, 0);
    b.finish()
}

/// `local function f() return f() + 1 end return f()`
fn runaway() -> Proto {
    let mut f = ProtoBuilder::new("@script.lua").max_stack(2);
    f.upvalue("f", UpvalueDesc::Stack(0));
    f.set_line(2);
    let k1 = rk_ask(f.int(1));
    f.abc(OpCode::GetUpval, 0, 0, 0);
    f.abc(OpCode::Call, 0, 1, 2);
    f.abc(OpCode::Add, 0, 0, k1);
    f.abc(OpCode::Return, 0, 2, 0);

    let mut b = ProtoBuilder::new("@script.lua").vararg().max_stack(2);
    b.upvalue("_ENV", UpvalueDesc::Stack(0));
    b.set_line(1);
    let f = b.proto(f.finish());
    b.abx(OpCode::Closure, 0, f);
    b.abc(OpCode::Move, 1, 0, 0);
    b.abc(OpCode::Call, 1, 1, 2);
    b.abc(OpCode::Return, 1, 2, 0);
    b.finish()
}

#[test]
fn run_prints_to_stdout() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = write_chunk(&dir, "hello.luac", &hello())?;

    Command::cargo_bin("lunar")?
        .arg("run")
        .arg(&path)
        .assert()
        .success()
        .stdout("sum\t3\n");
    Ok(())
}

#[test]
fn runtime_error_exits_with_failure() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = write_chunk(&dir, "runaway.luac", &runaway())?;

    Command::cargo_bin("lunar")?
        .args(["run", "--max-depth", "30"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("script.lua:2: stack overflow"));
    Ok(())
}

#[test]
fn source_text_is_rejected() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("plain.lua");
    fs::write(&path, "print('hi')\n")?;

    Command::cargo_bin("lunar")?
        .arg("run")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a precompiled chunk"));
    Ok(())
}

#[test]
fn missing_file_is_reported() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    Command::cargo_bin("lunar")?
        .arg("run")
        .arg(dir.path().join("absent.luac"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
    Ok(())
}

#[test]
fn list_shows_the_listing() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = write_chunk(&dir, "hello.luac", &hello())?;

    Command::cargo_bin("lunar")?
        .arg("list")
        .arg(&path)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("main <script.lua:0,0> (5 instructions)")
                .and(predicate::str::contains("GETTABUP")),
        );
    Ok(())
}
