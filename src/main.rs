fn main() {
    taskclock_lib::run()
}
